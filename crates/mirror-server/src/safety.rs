//! Pre-stream content screening.

/// Returned in place of a reply when a message is screened out.
pub const SAFETY_NOTICE: &str = "Safety notice: If you have thoughts of self-harm or extreme emotions, \
please immediately contact your local emergency helpline or a trusted person. \
This tool is for reflection and action planning only, not medical or psychological therapy.";

const SELF_HARM_KEYWORDS: &[&str] = &[
    "suicide",
    "kill myself",
    "hurt myself",
    "end my life",
    "don't want to live",
    "want to die",
    "self harm",
];

/// Decides whether a user message must be answered with the safety notice
/// instead of a generated reply.
pub trait SafetyScreen: Send + Sync {
    fn is_blocked(&self, text: &str) -> bool;
}

/// Case-insensitive substring match against a keyword list.
#[derive(Clone, Debug)]
pub struct KeywordScreen {
    keywords: Vec<String>,
}

impl KeywordScreen {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
        }
    }
}

impl Default for KeywordScreen {
    fn default() -> Self {
        Self::new(SELF_HARM_KEYWORDS)
    }
}

impl SafetyScreen for KeywordScreen {
    fn is_blocked(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}
