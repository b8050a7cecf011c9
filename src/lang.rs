use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Languages a channel can be configured with, identified by their ISO-639-1 code.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, poise::ChoiceParameter,
)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    #[name = "English"]
    En,
    #[name = "Portuguese"]
    Pt,
    #[name = "Spanish"]
    Es,
    #[name = "French"]
    Fr,
    #[name = "German"]
    De,
    #[name = "Italian"]
    It,
    #[name = "Dutch"]
    Nl,
    #[name = "Polish"]
    Pl,
    #[name = "Russian"]
    Ru,
    #[name = "Ukrainian"]
    Uk,
    #[name = "Turkish"]
    Tr,
    #[name = "Japanese"]
    Ja,
    #[name = "Korean"]
    Ko,
    #[name = "Chinese"]
    Zh,
    #[name = "Arabic"]
    Ar,
    #[name = "Hindi"]
    Hi,
}

impl Language {
    pub const ALL: [Language; 16] = [
        Language::En,
        Language::Pt,
        Language::Es,
        Language::Fr,
        Language::De,
        Language::It,
        Language::Nl,
        Language::Pl,
        Language::Ru,
        Language::Uk,
        Language::Tr,
        Language::Ja,
        Language::Ko,
        Language::Zh,
        Language::Ar,
        Language::Hi,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Pt => "pt",
            Language::Es => "es",
            Language::Fr => "fr",
            Language::De => "de",
            Language::It => "it",
            Language::Nl => "nl",
            Language::Pl => "pl",
            Language::Ru => "ru",
            Language::Uk => "uk",
            Language::Tr => "tr",
            Language::Ja => "ja",
            Language::Ko => "ko",
            Language::Zh => "zh",
            Language::Ar => "ar",
            Language::Hi => "hi",
        }
    }

    /// English name, used in translator prompts.
    pub fn english_name(self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Pt => "Portuguese",
            Language::Es => "Spanish",
            Language::Fr => "French",
            Language::De => "German",
            Language::It => "Italian",
            Language::Nl => "Dutch",
            Language::Pl => "Polish",
            Language::Ru => "Russian",
            Language::Uk => "Ukrainian",
            Language::Tr => "Turkish",
            Language::Ja => "Japanese",
            Language::Ko => "Korean",
            Language::Zh => "Chinese",
            Language::Ar => "Arabic",
            Language::Hi => "Hindi",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown language code '{0}'")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        // Accept regional tags such as "pt-BR" or "zh_CN".
        let primary = normalized
            .split(['-', '_'])
            .next()
            .unwrap_or_default();

        Language::ALL
            .into_iter()
            .find(|lang| lang.code() == primary || lang.english_name().eq_ignore_ascii_case(primary))
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_codes_and_names() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::En);
        assert_eq!("PT".parse::<Language>().unwrap(), Language::Pt);
        assert_eq!("pt-BR".parse::<Language>().unwrap(), Language::Pt);
        assert_eq!("zh_CN".parse::<Language>().unwrap(), Language::Zh);
        assert_eq!("german".parse::<Language>().unwrap(), Language::De);
        assert!("xx".parse::<Language>().is_err());
    }

    #[test]
    fn test_display_roundtrips_through_code() {
        for lang in Language::ALL {
            assert_eq!(lang.to_string().parse::<Language>().unwrap(), lang);
        }
    }

    #[test]
    fn test_default_is_english() {
        assert_eq!(Language::default(), Language::En);
    }
}
