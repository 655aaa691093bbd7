//! Prompt and guardrail construction
//!
//! Detects the target response language, composes the guardrail preamble
//! (language mirroring, brevity, image-brief, anti-fabrication), and
//! assembles the structured conversation sent upstream.

use crate::media::MediaItem;
use crate::upstream::client::{Content, Part};
use serde::Serialize;

/// How much of the combined user text is inspected for language detection
pub const LANG_SAMPLE_CHARS: usize = 6000;

/// Target response language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Ar,
    En,
}

impl Lang {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Lang::Ar => "ar",
            Lang::En => "en",
        }
    }

    /// Lenient parse of a caller-supplied language override
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ar" | "ara" | "arabic" => Some(Lang::Ar),
            "en" | "eng" | "english" => Some(Lang::En),
            _ => None,
        }
    }
}

fn is_arabic_char(c: char) -> bool {
    ('\u{0600}'..='\u{06FF}').contains(&c)
}

/// True if any character of `text` falls in the Arabic Unicode block
pub fn contains_arabic(text: &str) -> bool {
    text.chars().any(is_arabic_char)
}

/// Classify a text sample as Arabic or English
///
/// Only the first [`LANG_SAMPLE_CHARS`] characters are inspected; a single
/// Arabic character classifies the whole sample.
pub fn detect_lang(sample: &str) -> Lang {
    if sample.chars().take(LANG_SAMPLE_CHARS).any(is_arabic_char) {
        Lang::Ar
    } else {
        Lang::En
    }
}

/// Flags controlling which guardrail directives are emitted
#[derive(Debug, Clone, Copy)]
pub struct GuardrailOptions {
    pub lang: Lang,
    /// Brevity directive (question-answering mode)
    pub brief: bool,
    /// Media-focused answer shape: 3-5 actionable bullets plus one next step
    pub image_brief: bool,
    /// Anti-fabrication directive; disabled only at the relaxed guard level
    pub strict: bool,
}

/// Compose the guardrail preamble from the per-language phrase set
pub fn build_guardrail(options: &GuardrailOptions) -> String {
    let mut lines: Vec<&'static str> = Vec::with_capacity(4);

    lines.push(match options.lang {
        Lang::Ar => "أجب باللغة العربية فقط، بنفس لغة السؤال.",
        Lang::En => "Answer in English only, matching the language of the question.",
    });

    if options.brief {
        lines.push(match options.lang {
            Lang::Ar => "كن مباشرًا وموجزًا دون إطالة أو حشو.",
            Lang::En => "Be direct and concise; do not pad the answer.",
        });
    }

    if options.image_brief {
        lines.push(match options.lang {
            Lang::Ar => {
                "صف ما تُظهره الوسائط المرفقة في ٣ إلى ٥ نقاط عملية، ثم اذكر خطوة تالية واحدة فورية. دون أي مقدمات."
            }
            Lang::En => {
                "Describe what the attached media shows in 3 to 5 actionable bullet points, then give exactly one immediate next step. No preamble."
            }
        });
    }

    if options.strict {
        lines.push(match options.lang {
            Lang::Ar => {
                "اذكر افتراضاتك صراحةً، وتحقق من أي عملية حسابية قبل عرضها، وإذا نقصتك معلومة فاطرح سؤالًا توضيحيًا بدلًا من اختلاق الحقائق."
            }
            Lang::En => {
                "State your assumptions explicitly, verify any computation before presenting it, and if information is missing ask a clarifying question instead of inventing facts."
            }
        });
    }

    lines.join("\n")
}

/// Conversation role
///
/// Unrecognized role strings coerce to `User` rather than failing the
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    User,
    Model,
    System,
}

impl<'de> serde::Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value.as_str().map(str::to_ascii_lowercase).as_deref() {
            Some("model") | Some("assistant") => Role::Model,
            Some("system") => Role::System,
            _ => Role::User,
        })
    }
}

/// One normalized conversation turn, media already admitted
#[derive(Debug, Clone)]
pub struct AssembledTurn {
    pub role: Role,
    pub text: Option<String>,
    pub media: Vec<MediaItem>,
}

/// The finalized structured conversation
#[derive(Debug, Clone)]
pub struct Conversation {
    /// Combined system instruction (caller-supplied plus system-role turns)
    pub system: Option<String>,
    pub contents: Vec<Content>,
}

/// Assemble the outbound conversation
///
/// The guardrail block is injected exactly once, as a prefix of the first
/// user-role turn; continuation turns appended later never receive it.
/// System-role turns fold into the system instruction (the upstream
/// conversation itself only carries user and model roles). Turns left with
/// neither text nor media are dropped.
pub fn assemble(
    guardrail: &str,
    turns: Vec<AssembledTurn>,
    system_instruction: Option<String>,
) -> Conversation {
    let mut system_parts: Vec<String> = Vec::new();
    if let Some(instruction) = system_instruction {
        if !instruction.trim().is_empty() {
            system_parts.push(instruction);
        }
    }

    let mut contents: Vec<Content> = Vec::new();
    let mut guarded = false;

    for turn in turns {
        if turn.role == Role::System {
            if let Some(text) = turn.text {
                if !text.trim().is_empty() {
                    system_parts.push(text);
                }
            }
            continue;
        }

        let mut parts: Vec<Part> = Vec::new();
        let text = turn.text.filter(|t| !t.trim().is_empty());

        if turn.role == Role::User && !guarded {
            guarded = true;
            let combined = match &text {
                Some(t) if !guardrail.is_empty() => format!("{guardrail}\n\n{t}"),
                Some(t) => t.clone(),
                None if !guardrail.is_empty() => guardrail.to_string(),
                None => String::new(),
            };
            if !combined.is_empty() {
                parts.push(Part::text(combined));
            }
        } else if let Some(t) = text {
            parts.push(Part::text(t));
        }

        for item in turn.media {
            parts.push(Part::inline(item));
        }

        if parts.is_empty() {
            continue;
        }

        contents.push(match turn.role {
            Role::Model => Content::model(parts),
            _ => Content::user(parts),
        });
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    Conversation { system, contents }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn turn(role: Role, text: &str) -> AssembledTurn {
        AssembledTurn {
            role,
            text: Some(text.to_string()),
            media: Vec::new(),
        }
    }

    #[test]
    fn arabic_text_detected() {
        assert_eq!(detect_lang("ما هي عاصمة مصر؟"), Lang::Ar);
        assert_eq!(detect_lang("mixed with عربي inline"), Lang::Ar);
    }

    #[test]
    fn latin_text_detected_as_english() {
        assert_eq!(detect_lang("What is the capital of Egypt?"), Lang::En);
        assert_eq!(detect_lang(""), Lang::En);
        assert_eq!(detect_lang("12345 !@#"), Lang::En);
    }

    #[test]
    fn detection_only_inspects_prefix() {
        let mut sample = "a".repeat(LANG_SAMPLE_CHARS);
        sample.push_str("عربي");
        assert_eq!(detect_lang(&sample), Lang::En);
    }

    #[test]
    fn lang_parse_is_lenient() {
        assert_eq!(Lang::parse("AR"), Some(Lang::Ar));
        assert_eq!(Lang::parse("arabic"), Some(Lang::Ar));
        assert_eq!(Lang::parse(" en "), Some(Lang::En));
        assert_eq!(Lang::parse("fr"), None);
        assert_eq!(Lang::parse(""), None);
    }

    #[test]
    fn guardrail_includes_requested_directives() {
        let full = build_guardrail(&GuardrailOptions {
            lang: Lang::En,
            brief: true,
            image_brief: true,
            strict: true,
        });
        assert!(full.contains("English only"));
        assert!(full.contains("concise"));
        assert!(full.contains("bullet points"));
        assert!(full.contains("inventing facts"));

        let relaxed = build_guardrail(&GuardrailOptions {
            lang: Lang::En,
            brief: false,
            image_brief: false,
            strict: false,
        });
        assert!(relaxed.contains("English only"));
        assert!(!relaxed.contains("bullet points"));
        assert!(!relaxed.contains("inventing facts"));
    }

    #[test]
    fn arabic_guardrail_is_arabic() {
        let block = build_guardrail(&GuardrailOptions {
            lang: Lang::Ar,
            brief: true,
            image_brief: false,
            strict: true,
        });
        assert!(contains_arabic(&block));
    }

    #[test]
    fn unknown_role_coerces_to_user() {
        let role: Role = serde_json::from_value(json!("tool")).unwrap();
        assert_eq!(role, Role::User);

        let role: Role = serde_json::from_value(json!(7)).unwrap();
        assert_eq!(role, Role::User);

        let role: Role = serde_json::from_value(json!("ASSISTANT")).unwrap();
        assert_eq!(role, Role::Model);
    }

    #[test]
    fn guardrail_injected_once_on_first_user_turn() {
        let convo = assemble(
            "GUARD",
            vec![
                turn(Role::User, "first question"),
                turn(Role::Model, "first answer"),
                turn(Role::User, "second question"),
            ],
            None,
        );

        assert_eq!(convo.contents.len(), 3);
        let first = convo.contents[0].text_joined();
        assert!(first.starts_with("GUARD\n\n"));
        assert!(first.contains("first question"));
        assert!(!convo.contents[1].text_joined().contains("GUARD"));
        assert!(!convo.contents[2].text_joined().contains("GUARD"));
    }

    #[test]
    fn model_turn_before_first_user_turn_is_not_guarded() {
        let convo = assemble(
            "GUARD",
            vec![turn(Role::Model, "greeting"), turn(Role::User, "question")],
            None,
        );
        assert!(!convo.contents[0].text_joined().contains("GUARD"));
        assert!(convo.contents[1].text_joined().starts_with("GUARD"));
    }

    #[test]
    fn system_turns_fold_into_system_instruction() {
        let convo = assemble(
            "",
            vec![turn(Role::System, "be formal"), turn(Role::User, "hi")],
            Some("base instruction".to_string()),
        );
        assert_eq!(convo.system.as_deref(), Some("base instruction\n\nbe formal"));
        assert_eq!(convo.contents.len(), 1);
    }

    #[test]
    fn empty_turns_are_dropped() {
        let convo = assemble(
            "",
            vec![
                AssembledTurn {
                    role: Role::User,
                    text: Some("  ".to_string()),
                    media: Vec::new(),
                },
                turn(Role::User, "real"),
            ],
            None,
        );
        assert_eq!(convo.contents.len(), 1);
    }

    #[test]
    fn media_only_user_turn_keeps_guardrail_text() {
        let convo = assemble(
            "GUARD",
            vec![AssembledTurn {
                role: Role::User,
                text: None,
                media: vec![MediaItem {
                    mime_type: "image/png".to_string(),
                    data: "aGVsbG8=".to_string(),
                }],
            }],
            None,
        );
        assert_eq!(convo.contents.len(), 1);
        assert_eq!(convo.contents[0].text_joined(), "GUARD");
        assert_eq!(convo.contents[0].parts.len(), 2);
    }
}
