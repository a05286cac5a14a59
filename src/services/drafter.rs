//! Bid message drafting
//!
//! Picks a template (the active one, or whichever the model ranks best for the
//! listing), fills in the listing details and asks the model for the final
//! pitch. Drafting never fails: any error yields [`FALLBACK_MESSAGE`].

use crate::config::PromptSelectionMode;
use crate::db::Database;
use crate::llm::TextGenerator;
use crate::types::{prompt_hash, truncate_chars, Listing, PromptTemplate};
use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// Template used when the store has no active template
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"
You are an elite full-stack developer with 10+ years of experience, a 5.0 rating, 300+ reviews, and a portfolio full of React/Next.js, TypeScript, Node.js, mobile apps (React Native/Flutter), Three.js/WebGL, AR/VR, and game projects.

A client just posted this brand-new project on Freelancer.com (posted less than 2 minutes ago):

Title: {project_title}

Full description: {full_description}

Budget: ${budget_min}–${budget_max}
Skills listed: {skills_list}

Your job is to write the PERFECT first message (max 2–3 short paragraphs, 100–160 words) that wins the job almost every time.

Rules you MUST follow:
- Open with a hyper-specific observation about THEIR project in the very first sentence (reference something unique from the description that 99% of bidders will miss).
- Prove you read everything and already thought deeper than anyone else.
- Mention 1–2 directly relevant past projects from your portfolio with measurable results (speed improvement, revenue generated, user growth, etc.).
- Drop one impressive but believable industry stat or competitor insight that makes them think "this person did research on my niche".
- Make the tone confident, slightly playful, and human, never robotic or overly formal.
- End with a low-friction call-to-action + a specific question that forces them to reply.
- Do NOT mention price or delivery time in the first message (we handle that after they reply).
- Do NOT use the words "hope", "looking forward", "pleasure", or any generic filler.

Write only the message itself. No greetings like "Hi there", no sign-off. Just the body.
"#;

/// Sent when the model cannot produce a message
pub const FALLBACK_MESSAGE: &str = "I just saw your project and already have a clear plan to deliver exactly what you need. What's the one feature you're most excited about?";

/// Replaced by the listing's actual age
const AGE_MARKER: &str = "posted less than 2 minutes ago";

/// Description cap when filling a template
const TEMPLATE_DESCRIPTION_CHARS: usize = 3000;

/// Description cap in the ranking request
const RANKING_DESCRIPTION_CHARS: usize = 2000;

fn first_number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").unwrap())
}

/// A drafted message and the template it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub message: String,
    /// Stored template used; `None` for the built-in template or the fallback message
    pub template_id: Option<i64>,
    /// Fingerprint of the template body; `None` for the fallback message
    pub prompt_hash: Option<String>,
}

impl Draft {
    fn fallback() -> Self {
        Self {
            message: FALLBACK_MESSAGE.to_string(),
            template_id: None,
            prompt_hash: None,
        }
    }
}

/// Template chosen for one listing
#[derive(Debug, Clone, PartialEq)]
struct Selection {
    body: String,
    id: Option<i64>,
}

impl Selection {
    fn builtin() -> Self {
        Self {
            body: DEFAULT_PROMPT_TEMPLATE.to_string(),
            id: None,
        }
    }

    fn from_template(template: &PromptTemplate) -> Self {
        Self {
            body: template.template.clone(),
            id: Some(template.id),
        }
    }
}

pub struct MessageDrafter {
    db: Arc<Database>,
    generator: Arc<dyn TextGenerator>,
}

impl MessageDrafter {
    pub fn new(db: Arc<Database>, generator: Arc<dyn TextGenerator>) -> Self {
        Self { db, generator }
    }

    /// Draft a pitch for `listing`
    pub async fn draft(&self, listing: &Listing, mode: PromptSelectionMode, now: DateTime<Utc>) -> Draft {
        let selection = match mode {
            PromptSelectionMode::Manual => {
                let selection = self.active_or_builtin().await;
                info!("Manual mode: Using active prompt (ID: {:?})", selection.id);
                selection
            }
            PromptSelectionMode::Dynamic => self.rank_templates(listing).await,
        };

        let filled = render_template(&selection.body, listing, now);

        match self.generator.generate(&filled).await {
            Ok(message) => Draft {
                message,
                template_id: selection.id,
                prompt_hash: Some(prompt_hash(&selection.body)),
            },
            Err(e) => {
                warn!("Gemini failed: {}", e);
                Draft::fallback()
            }
        }
    }

    async fn active_or_builtin(&self) -> Selection {
        match self.db.get_active_prompt_template().await {
            Ok(Some(template)) => Selection::from_template(&template),
            Ok(None) => Selection::builtin(),
            Err(e) => {
                warn!("Error loading prompt from database: {}, using default", e);
                Selection::builtin()
            }
        }
    }

    /// Ask the model which stored template suits the listing best
    async fn rank_templates(&self, listing: &Listing) -> Selection {
        let templates = match self.db.list_prompt_templates().await {
            Ok(templates) if !templates.is_empty() => templates,
            Ok(_) => return self.active_or_builtin().await,
            Err(e) => {
                warn!("Error loading prompts: {}", e);
                return self.active_or_builtin().await;
            }
        };

        let request = ranking_prompt(listing, &templates);
        match self.generator.generate(&request).await {
            Ok(reply) => {
                if let Some(index) = parse_selection(&reply, templates.len()) {
                    let chosen = &templates[index];
                    info!("AI selected prompt: {} (ID: {})", chosen.name, chosen.id);
                    return Selection::from_template(chosen);
                }
                warn!("Unusable prompt selection reply {:?}, using fallback", truncate_chars(&reply, 40));
            }
            Err(e) => warn!("Error in prompt selection: {}, using fallback", e),
        }

        fallback_selection(&templates)
    }
}

/// Active template from the list, else the first one
fn fallback_selection(templates: &[PromptTemplate]) -> Selection {
    templates
        .iter()
        .find(|t| t.is_active)
        .or_else(|| templates.first())
        .map(Selection::from_template)
        .unwrap_or_else(Selection::builtin)
}

/// Zero-based index from the first number in the reply, if it is 1..=count
fn parse_selection(reply: &str, count: usize) -> Option<usize> {
    let number: usize = first_number().find(reply)?.as_str().parse().ok()?;
    (1..=count).contains(&number).then(|| number - 1)
}

fn ranking_prompt(listing: &Listing, templates: &[PromptTemplate]) -> String {
    let summary = templates
        .iter()
        .enumerate()
        .map(|(i, t)| {
            format!(
                "{}. {}: {}",
                i + 1,
                t.name,
                t.description.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let n = templates.len();
    format!(
        "You are an expert at matching project requirements to the most effective bid strategy.

PROJECT DETAILS:
Title: {title}
Description: {description}
Skills: {skills}
Budget: ${min}–${max}

AVAILABLE PROMPT STRATEGIES:
{summary}

Your task: Analyze the project and select the SINGLE BEST prompt strategy (by number 1-{n}) that will maximize reply rate and win probability.

Consider:
- Project complexity and scope
- Client language and tone (technical vs. business vs. non-technical)
- Budget level and project type
- Specific keywords and requirements mentioned
- Whether it's a new build, fix, integration, or consultation

Respond with ONLY the number (1-{n}) of the best prompt strategy. No explanation, just the number.",
        title = listing.title,
        description = truncate_chars(&listing.description, RANKING_DESCRIPTION_CHARS),
        skills = listing.skills.join(", "),
        min = format_amount(listing.budget.minimum),
        max = budget_max_text(listing),
        summary = summary,
        n = n,
    )
}

/// Fill the template placeholders and swap the age marker for the real age
pub fn render_template(template: &str, listing: &Listing, now: DateTime<Utc>) -> String {
    template
        .replace("{project_title}", &listing.title)
        .replace(
            "{full_description}",
            &truncate_chars(&listing.description, TEMPLATE_DESCRIPTION_CHARS),
        )
        .replace("{budget_min}", &format_amount(listing.budget.minimum))
        .replace("{budget_max}", &budget_max_text(listing))
        .replace("{skills_list}", &listing.skills.join(", "))
        .replace(AGE_MARKER, &age_phrase(listing, now))
}

/// "posted less than 2 minutes ago", "posted N minutes ago", or "just posted" when unknown
pub fn age_phrase(listing: &Listing, now: DateTime<Utc>) -> String {
    match listing.age_minutes(now) {
        Some(minutes) if minutes < 2 => AGE_MARKER.to_string(),
        Some(minutes) => format!("posted {} minutes ago", minutes),
        None => "just posted".to_string(),
    }
}

fn budget_max_text(listing: &Listing) -> String {
    listing
        .budget
        .maximum
        .map(format_amount)
        .unwrap_or_else(|| "open".to_string())
}

fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}
