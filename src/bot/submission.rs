//! Turning raw message text into something the bot can act on.

/// A slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    About,
    /// One-shot analysis of the text after the command.
    Analyze(String),
    Talk,
    Intake,
    Summary,
    Tags,
    Reset,
    Profile,
    Unknown(String),
}

/// A main-keyboard button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Analyze,
    Talk,
    Summary,
    Reset,
}

impl Button {
    pub const ANALYZE: &'static str = "Анализ";
    pub const TALK: &'static str = "Поговорить";
    pub const SUMMARY: &'static str = "Выводы";
    pub const RESET: &'static str = "Очистить историю";

    pub fn label(self) -> &'static str {
        match self {
            Button::Analyze => Self::ANALYZE,
            Button::Talk => Self::TALK,
            Button::Summary => Self::SUMMARY,
            Button::Reset => Self::RESET,
        }
    }
}

/// What an inbound message is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Command(Command),
    Button(Button),
    Text(String),
}

/// Parses message content into a `Submission`.
pub struct SubmissionParser;

impl SubmissionParser {
    pub fn parse(content: &str) -> Submission {
        let trimmed = content.trim();

        if trimmed.starts_with('/') {
            return Submission::Command(parse_command(trimmed));
        }

        match trimmed.to_lowercase().as_str() {
            "анализ" => Submission::Button(Button::Analyze),
            "поговорить" => Submission::Button(Button::Talk),
            "выводы" => Submission::Button(Button::Summary),
            "очистить историю" => Submission::Button(Button::Reset),
            _ => Submission::Text(trimmed.to_string()),
        }
    }
}

/// `/name[@bot] [args...]`. The name is case-insensitive, args keep their case.
fn parse_command(trimmed: &str) -> Command {
    let (head, args) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (trimmed, ""),
    };
    let name = head
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or_default()
        .to_lowercase();

    match name.as_str() {
        "start" => Command::Start,
        "help" | "помощь" => Command::Help,
        "about" | "о_вове" => Command::About,
        "analyze" | "анализ" => Command::Analyze(args.to_string()),
        "talk" | "поговорить" => Command::Talk,
        "intake" | "разбор" => Command::Intake,
        "summary" | "выводы" | "сводка" => Command::Summary,
        "tags" | "теги" => Command::Tags,
        "reset" | "очистить_историю" => Command::Reset,
        "profile" | "профиль" => Command::Profile,
        _ => Command::Unknown(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_commands() {
        assert_eq!(SubmissionParser::parse("/start"), Submission::Command(Command::Start));
        assert_eq!(SubmissionParser::parse("/о_вове"), Submission::Command(Command::About));
        assert_eq!(SubmissionParser::parse("/разбор"), Submission::Command(Command::Intake));
        assert_eq!(SubmissionParser::parse("/сводка"), Submission::Command(Command::Summary));
        assert_eq!(SubmissionParser::parse("/Выводы"), Submission::Command(Command::Summary));
        assert_eq!(
            SubmissionParser::parse("/очистить_историю"),
            Submission::Command(Command::Reset)
        );
    }

    #[test]
    fn parse_analyze_keeps_argument_case() {
        assert_eq!(
            SubmissionParser::parse("/анализ  Мне Плохо "),
            Submission::Command(Command::Analyze("Мне Плохо".into()))
        );
        assert_eq!(
            SubmissionParser::parse("/analyze"),
            Submission::Command(Command::Analyze(String::new()))
        );
    }

    #[test]
    fn parse_strips_bot_mention() {
        assert_eq!(
            SubmissionParser::parse("/talk@VovaBot"),
            Submission::Command(Command::Talk)
        );
        assert_eq!(
            SubmissionParser::parse("/analyze@VovaBot тревожно"),
            Submission::Command(Command::Analyze("тревожно".into()))
        );
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(
            SubmissionParser::parse("/dance"),
            Submission::Command(Command::Unknown("dance".into()))
        );
    }

    #[test]
    fn parse_buttons_case_insensitive() {
        assert_eq!(SubmissionParser::parse("Анализ"), Submission::Button(Button::Analyze));
        assert_eq!(SubmissionParser::parse("поговорить"), Submission::Button(Button::Talk));
        assert_eq!(SubmissionParser::parse(" Выводы "), Submission::Button(Button::Summary));
        assert_eq!(
            SubmissionParser::parse("Очистить историю"),
            Submission::Button(Button::Reset)
        );
    }

    #[test]
    fn parse_free_text() {
        assert_eq!(
            SubmissionParser::parse("  не могу уснуть  "),
            Submission::Text("не могу уснуть".into())
        );
        assert_eq!(
            SubmissionParser::parse("анализ моих снов"),
            Submission::Text("анализ моих снов".into())
        );
    }

    #[test]
    fn button_labels_round_trip() {
        for button in [Button::Analyze, Button::Talk, Button::Summary, Button::Reset] {
            assert_eq!(SubmissionParser::parse(button.label()), Submission::Button(button));
        }
    }
}
