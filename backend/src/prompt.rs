use veracity_stream::AssessRequest;

/// Request intent selected by the caller or routed by default.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Assess,
    Dialogue,
    Guidance,
}

impl Mode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "assess" => Some(Self::Assess),
            "dialogue" => Some(Self::Dialogue),
            "guidance" => Some(Self::Guidance),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assess => "assess",
            Self::Dialogue => "dialogue",
            Self::Guidance => "guidance",
        }
    }
}

/// Routes a claim with no explicit mode.
///
/// Intent classification is the model's job, not ours; every unrouted request
/// goes down the assessment path and the rubric tells the model how to handle
/// conversational or advice-seeking input.
pub fn route_intent(_claim: &str) -> Mode {
    Mode::Assess
}

/// Builds the prompts sent to the model. Opaque to the streaming core; the
/// backend owns prompt text and the core only sees the resulting byte stream.
pub trait PromptBuilder: Send + Sync {
    fn system_prompt(&self, mode: Mode) -> String;
    fn build_prompt(&self, request: &AssessRequest, mode: Mode) -> String;
}

/// Default rubric prompt set.
#[derive(Default)]
pub struct RubricPromptBuilder;

const OUTPUT_CONTRACT: &str = r#"Respond with a single JSON object and nothing else. Fields:
- "realityScore": number 0-10, how factually grounded the claim is
- "integrityScore": number 0-10, how honestly the claim is framed
- "verdict": short string judgment
- "summary": one-paragraph string
- "keyFindings": array of strings
- "sources": array of strings
- "biasIndicators": array of strings
- "counterpoints": array of strings
Emit "realityScore" and "integrityScore" as early in the object as possible."#;

impl PromptBuilder for RubricPromptBuilder {
    fn system_prompt(&self, mode: Mode) -> String {
        let role = match mode {
            Mode::Assess => "You are a rigorous fact assessor. Evaluate the claim below.",
            Mode::Dialogue => {
                "You are a rigorous fact assessor in an ongoing dialogue. Address the \
                 user's message and assess any factual claims it contains."
            }
            Mode::Guidance => {
                "You are a rigorous fact assessor. The user is asking for guidance; \
                 answer their question and assess the assumptions behind it."
            }
        };
        format!("{role}\n\n{OUTPUT_CONTRACT}")
    }

    fn build_prompt(&self, request: &AssessRequest, mode: Mode) -> String {
        format!(
            "Mode: {}\nRespond in language: {}\n\nClaim:\n{}",
            mode.as_str(),
            request.language,
            request.claim,
        )
    }
}
