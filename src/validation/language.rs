//! Script-ratio language check.
//!
//! Target languages are mapped to a script and a minimum share of characters
//! written in it. Unrecognized languages have no requirement.

use std::borrow::Cow;

/// Writing system checked for a target language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// U+0400..=U+04FF.
    Cyrillic,
    /// ASCII a-z, case-insensitive.
    Latin,
}

impl Script {
    fn contains(&self, c: char) -> bool {
        match self {
            Script::Cyrillic => ('\u{0400}'..='\u{04FF}').contains(&c),
            Script::Latin => c.is_ascii_alphabetic(),
        }
    }
}

/// Script requirement for a recognized target language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageRequirement {
    /// Name used in rejection reasons (`not_<name>`).
    pub name: &'static str,
    pub script: Script,
}

/// Look up the requirement for a target language code or name.
pub fn requirement_for(target_language: &str) -> Option<LanguageRequirement> {
    let normalized = target_language.trim().to_lowercase();
    let (name, script) = match normalized.as_str() {
        "ru" | "russian" | "русский" => ("russian", Script::Cyrillic),
        "en" | "english" => ("english", Script::Latin),
        "es" | "spanish" | "español" | "espanol" => ("spanish", Script::Latin),
        "de" | "german" | "deutsch" => ("german", Script::Latin),
        "fr" | "french" | "français" | "francais" => ("french", Script::Latin),
        _ => return None,
    };
    Some(LanguageRequirement { name, script })
}

/// Share of characters in `text` belonging to `script`.
pub fn script_ratio(text: &str, script: Script) -> f64 {
    let mut total = 0usize;
    let mut matching = 0usize;
    for c in text.chars() {
        total += 1;
        if script.contains(c) {
            matching += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        matching as f64 / total as f64
    }
}

/// Remove fenced code blocks (```...```), which are script-neutral.
///
/// An unterminated fence runs to the end of the text.
pub fn strip_code_blocks(text: &str) -> Cow<'_, str> {
    const FENCE: &str = "```";
    if !text.contains(FENCE) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(FENCE) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + FENCE.len()..];
        match after_open.find(FENCE) {
            Some(end) => rest = &after_open[end + FENCE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}
