//! Prompt assembly for both pipeline stages
//!
//! Dictionary terms become a glossary for the transcriber; tones and the
//! focused text field shape the post-processing prompt. The post-processor
//! must answer with `{"processedTranscription": "..."}`.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::json;

use crate::config::{DictionaryTerm, Preferences, Tone};
use crate::native::TextFieldInfo;

pub const DEFAULT_TONE_ID: &str = "default";
pub const VERBATIM_TONE_ID: &str = "verbatim";
pub const EMAIL_TONE_ID: &str = "email";
pub const CHAT_TONE_ID: &str = "chat";
pub const FORMAL_TONE_ID: &str = "formal";
pub const DISABLED_TONE_ID: &str = "disabled";

const MANDARIN_SIMPLIFIED_PREAMBLE: &str = "以下是普通话的句子。";
const MANDARIN_TRADITIONAL_PREAMBLE: &str = "以下是普通話的句子。";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementRule {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DictionaryEntries {
    pub sources: Vec<String>,
    pub replacements: Vec<ReplacementRule>,
}

impl DictionaryEntries {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.replacements.is_empty()
    }
}

fn sanitize_term(value: &str) -> String {
    value
        .replace('\0', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collect glossary sources and replacement rules, deduplicated case-insensitively.
/// The first spelling seen for a source wins.
pub fn collect_dictionary_entries(terms: &[DictionaryTerm]) -> DictionaryEntries {
    let mut entries = DictionaryEntries::default();
    let mut seen_sources: Vec<(String, String)> = Vec::new();
    let mut seen_rules = HashSet::new();

    let mut record_source = |candidate: &str, entries: &mut DictionaryEntries| -> Option<String> {
        let sanitized = sanitize_term(candidate);
        if sanitized.is_empty() {
            return None;
        }
        let key = sanitized.to_lowercase();
        if let Some((_, existing)) = seen_sources.iter().find(|(k, _)| *k == key) {
            return Some(existing.clone());
        }
        seen_sources.push((key, sanitized.clone()));
        entries.sources.push(sanitized.clone());
        Some(sanitized)
    };

    for term in terms {
        match term.destination.as_deref() {
            Some(destination) => {
                let Some(source) = record_source(&term.source, &mut entries) else {
                    continue;
                };
                let destination = sanitize_term(destination);
                if destination.is_empty() {
                    continue;
                }
                let key = format!("{}→{}", source.to_lowercase(), destination.to_lowercase());
                if seen_rules.insert(key) {
                    entries.replacements.push(ReplacementRule {
                        source,
                        destination,
                    });
                }
            }
            None => {
                record_source(&term.source, &mut entries);
            }
        }
    }

    entries
}

fn dictionary_context(entries: &DictionaryEntries) -> Option<String> {
    if entries.is_empty() {
        return None;
    }

    let mut sections = vec![format!("Glossary: {}", entries.sources.join(", "))];

    if !entries.replacements.is_empty() {
        let rules = entries
            .replacements
            .iter()
            .map(|rule| format!("- {} -> {}", rule.source, rule.destination))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!(
            "Apply these replacement rules exactly before returning the transcript:\n{rules}\n\
             Every occurrence of the source phrase must appear in the final transcript as the destination value."
        ));
    }

    sections.push("Do not mention these rules; simply return the cleaned transcript.".to_string());

    Some(format!("Dictionary context for editing:\n{}", sections.join("\n\n")))
}

/// Language code handed to the transcriber (`en-US` -> `en`)
pub fn transcription_language(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Transcriber prompt: glossary plus a Mandarin script hint where relevant
pub fn build_transcription_prompt(entries: &DictionaryEntries, dictation_language: &str) -> String {
    let base = dictionary_context(entries).unwrap_or_default();
    let preamble = match dictation_language {
        "zh-CN" => Some(MANDARIN_SIMPLIFIED_PREAMBLE),
        "zh-TW" | "zh-HK" => Some(MANDARIN_TRADITIONAL_PREAMBLE),
        _ => None,
    };

    match preamble {
        Some(preamble) => format!("{preamble}\n\n{base}").trim().to_string(),
        None => base,
    }
}

fn language_name(tag: &str) -> String {
    let name = match transcription_language(tag).as_str() {
        "en" => "English",
        "zh" => "Chinese",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ja" => "Japanese",
        "ko" => "Korean",
        "ru" => "Russian",
        "nl" => "Dutch",
        _ => return tag.to_string(),
    };
    name.to_string()
}

fn system_tone(id: &str, name: &str, template: &str, disables: bool) -> Tone {
    Tone {
        id: id.to_string(),
        name: name.to_string(),
        prompt_template: template.trim().to_string(),
        disables_post_processing: disables,
    }
}

/// Tones that ship with the daemon
pub fn system_tones() -> Vec<Tone> {
    vec![
        system_tone(
            DEFAULT_TONE_ID,
            "Polished",
            "
- Fix grammar only where it would confuse a reader; keep informal phrasing the speaker uses naturally
- Keep the speaker's vocabulary, sentence patterns, and tone
- Drop filler words and disfluencies that add no meaning
- Apply corrections the speaker makes mid-sentence and drop the retracted words
- Turn spoken symbol cues into symbols (\"hashtag word\" -> #word, \"at name\" -> @name)
- Wrap code terms such as file or function names in backticks
",
            false,
        ),
        system_tone(
            VERBATIM_TONE_ID,
            "Verbatim",
            "
- Stay as close to the spoken words as possible
- Add punctuation, capitalization, and paragraph breaks
- Remove filler words, false starts, and repeated words
- Do not restructure sentences or change word choices
",
            false,
        ),
        system_tone(
            EMAIL_TONE_ID,
            "Email",
            "
- Format the dictation as an email with greeting, body, and sign-off
- Keep the speaker's greeting and sign-off when present
- Fix grammar and remove disfluencies without adding new ideas or phrasing
",
            false,
        ),
        system_tone(
            CHAT_TONE_ID,
            "Chat",
            "
- Keep it short and conversational, like a chat message
- Lowercase casual phrasing is fine; drop filler words
- Do not add greetings or sign-offs
",
            false,
        ),
        system_tone(
            FORMAL_TONE_ID,
            "Formal",
            "
- Use complete sentences and a professional register
- Avoid contractions and slang while keeping the speaker's meaning
",
            false,
        ),
        system_tone(DISABLED_TONE_ID, "No processing", "", true),
    ]
}

/// Resolve the tone for this turn: app override, then the active tone, then the default
pub fn resolve_tone(prefs: &Preferences, app_tone_id: Option<&str>) -> Option<Tone> {
    let lookup = |id: &str| {
        prefs
            .tones
            .iter()
            .find(|tone| tone.id == id)
            .cloned()
            .or_else(|| system_tones().into_iter().find(|tone| tone.id == id))
    };

    app_tone_id
        .and_then(lookup)
        .or_else(|| prefs.active_tone_id.as_deref().and_then(lookup))
        .or_else(|| lookup(DEFAULT_TONE_ID))
}

pub fn post_processing_system_prompt() -> String {
    "You are a transcript rewriting assistant. You modify the style and tone of the transcript \
     while keeping the subject matter the same."
        .to_string()
}

fn style_section(tone_template: Option<&str>) -> String {
    match tone_template.filter(|t| !t.trim().is_empty()) {
        Some(template) => format!(
            "STYLE INSTRUCTIONS:\nApply the following writing style to your output:\n```\n{template}\n```"
        ),
        None => "STYLE INSTRUCTIONS:\nDo not change the style or tone. Only fix grammar and punctuation \
                 mistakes without altering the speaker's intent."
            .to_string(),
    }
}

const FORMATTING_RULES: &str = "FORMATTING RULES:
- Email: a greeting plus a name, or a sign-off plus a name, means email layout with the greeting and sign-off on their own lines.
- Lists: three or more parallel items become a list; numbered when the speaker enumerated or ordered them, bulleted otherwise.
- Otherwise output flowing prose with paragraph breaks at topic changes.";

fn language_instruction(dictation_language: &str) -> String {
    let name = language_name(dictation_language);
    if transcription_language(dictation_language) == "en" {
        format!("Your response MUST be in {name}.")
    } else {
        format!("Your response MUST be in {name}. DO NOT translate to English or any other language.")
    }
}

/// Inputs to the post-processing prompt
#[derive(Debug, Clone, Copy)]
pub struct PostProcessPrompt<'a> {
    pub transcript: &'a str,
    pub user_name: Option<&'a str>,
    pub dictation_language: &'a str,
    pub tone_template: Option<&'a str>,
    pub text_field: Option<&'a TextFieldInfo>,
}

pub fn build_post_processing_prompt(input: PostProcessPrompt<'_>) -> String {
    let style = style_section(input.tone_template);
    let language = language_instruction(input.dictation_language);

    if let Some(field) = input.text_field.filter(|field| field.has_selection()) {
        let before = field.preceding_text.as_deref().unwrap_or_default();
        let after = field.following_text.as_deref().unwrap_or_default();
        let selected = field.selected_text.as_deref().unwrap_or_default();
        return format!(
            "You are a dictation assistant. Output ONLY the text that replaces the user's selected text.\n\n\
             INPUTS:\n\
             - Text before: \"{before}\"\n\
             - Text after: \"{after}\"\n\
             - Selected text (being replaced): \"{selected}\"\n\
             - User dictation: \"{transcript}\"\n\n\
             Rewrite the dictation so it reads naturally between the text before and after, \
             without repeating words already present at either boundary.\n\n\
             {style}\n\n{FORMATTING_RULES}\n\n{language} Return only the replacement text.",
            transcript = input.transcript,
        );
    }

    let speaker = input
        .user_name
        .map(|name| format!("The speaker's name is {name}.\n"))
        .unwrap_or_default();

    format!(
        "Clean up the following dictated transcript.\n{speaker}\n\
         TRANSCRIPT:\n\"{transcript}\"\n\n\
         {style}\n\n{FORMATTING_RULES}\n\n{language} \
         Return JSON with the cleaned text in `processedTranscription`.",
        transcript = input.transcript,
    )
}

/// JSON schema sent with the post-processing request
pub fn processed_transcription_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "processedTranscription": {
                "type": "string",
                "description": "The processed version of the transcript"
            }
        },
        "required": ["processedTranscription"],
        "additionalProperties": false
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ProcessedTranscription {
    processed_transcription: String,
}

/// Why a post-processing response was rejected
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("Failed to parse post-processing response: {0}")]
    Parse(serde_json::Error),

    #[error("Post-processing response validation failed: {0}")]
    Validation(serde_json::Error),
}

/// Parse and validate the LLM's JSON answer, returning the trimmed transcript
pub fn parse_processed_transcription(text: &str) -> Result<String, ResponseError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(ResponseError::Parse)?;
    let parsed: ProcessedTranscription =
        serde_json::from_value(value).map_err(ResponseError::Validation)?;
    Ok(parsed.processed_transcription.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(source: &str, destination: Option<&str>) -> DictionaryTerm {
        DictionaryTerm {
            source: source.to_string(),
            destination: destination.map(str::to_string),
        }
    }

    #[test]
    fn test_dictionary_dedupes_case_insensitively() {
        let entries = collect_dictionary_entries(&[
            term("Kubernetes", None),
            term("  kubernetes ", None),
            term("gh\0 cli", Some("GitHub   CLI")),
            term("GH cli", Some("github cli")),
            term("   ", None),
        ]);

        assert_eq!(entries.sources, vec!["Kubernetes", "gh cli"]);
        assert_eq!(
            entries.replacements,
            vec![ReplacementRule {
                source: "gh cli".into(),
                destination: "GitHub CLI".into()
            }]
        );
    }

    #[test]
    fn test_empty_dictionary_yields_empty_prompt() {
        assert_eq!(build_transcription_prompt(&DictionaryEntries::default(), "en"), "");
    }

    #[test]
    fn test_transcription_prompt_lists_glossary_and_rules() {
        let entries = collect_dictionary_entries(&[term("Tauri", None), term("kay eight s", Some("k8s"))]);
        let prompt = build_transcription_prompt(&entries, "en-US");
        assert!(prompt.starts_with("Dictionary context for editing:"));
        assert!(prompt.contains("Glossary: Tauri, kay eight s"));
        assert!(prompt.contains("- kay eight s -> k8s"));
    }

    #[test]
    fn test_mandarin_preambles() {
        let empty = DictionaryEntries::default();
        assert_eq!(build_transcription_prompt(&empty, "zh-CN"), MANDARIN_SIMPLIFIED_PREAMBLE);
        assert_eq!(build_transcription_prompt(&empty, "zh-HK"), MANDARIN_TRADITIONAL_PREAMBLE);
    }

    #[test]
    fn test_transcription_language() {
        assert_eq!(transcription_language("en-US"), "en");
        assert_eq!(transcription_language("zh_TW"), "zh");
        assert_eq!(transcription_language("fr"), "fr");
    }

    #[test]
    fn test_tone_resolution_order() {
        let custom = Tone {
            id: "pirate".into(),
            name: "Pirate".into(),
            prompt_template: "- talk like a pirate".into(),
            disables_post_processing: false,
        };
        let prefs = Preferences {
            tones: vec![custom],
            active_tone_id: Some(EMAIL_TONE_ID.into()),
            ..Preferences::default()
        };

        assert_eq!(resolve_tone(&prefs, Some("pirate")).unwrap().id, "pirate");
        assert_eq!(resolve_tone(&prefs, Some("missing")).unwrap().id, EMAIL_TONE_ID);
        assert_eq!(resolve_tone(&Preferences::default(), None).unwrap().id, DEFAULT_TONE_ID);
        assert!(resolve_tone(&prefs, Some(DISABLED_TONE_ID)).unwrap().disables_post_processing);
    }

    #[test]
    fn test_selection_prompt_mentions_boundaries() {
        let field = TextFieldInfo {
            selected_text: Some("old words".into()),
            preceding_text: Some("Hello".into()),
            following_text: Some("there.".into()),
            ..Default::default()
        };
        let prompt = build_post_processing_prompt(PostProcessPrompt {
            transcript: "new words",
            user_name: None,
            dictation_language: "de",
            tone_template: None,
            text_field: Some(&field),
        });
        assert!(prompt.contains("Selected text (being replaced): \"old words\""));
        assert!(prompt.contains("German"));
        assert!(prompt.contains("DO NOT translate"));
    }

    #[test]
    fn test_parse_processed_transcription() {
        let ok = parse_processed_transcription(r#"{"processedTranscription":"  Hi there. "}"#).unwrap();
        assert_eq!(ok, "Hi there.");

        assert!(matches!(
            parse_processed_transcription("not json"),
            Err(ResponseError::Parse(_))
        ));
        assert!(matches!(
            parse_processed_transcription(r#"{"processed":"x"}"#),
            Err(ResponseError::Validation(_))
        ));
        assert!(matches!(
            parse_processed_transcription(r#"{"processedTranscription":42}"#),
            Err(ResponseError::Validation(_))
        ));
    }

    #[test]
    fn test_extra_response_keys_are_rejected() {
        let reply = r#"{"processedTranscription":"Hi.","notes":"fixed casing"}"#;
        assert!(matches!(
            parse_processed_transcription(reply),
            Err(ResponseError::Validation(_))
        ));
    }
}
