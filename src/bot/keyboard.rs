use crate::bot::submission::Button;
use crate::channels::ReplyKeyboard;

/// The persistent keyboard shown under every reply.
pub fn main_keyboard() -> ReplyKeyboard {
    ReplyKeyboard {
        rows: vec![
            vec![Button::ANALYZE.into(), Button::TALK.into()],
            vec![Button::SUMMARY.into(), Button::RESET.into()],
        ],
        resize: true,
        one_time: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_two_by_two() {
        let kb = main_keyboard();
        assert_eq!(
            kb.rows,
            vec![
                vec!["Анализ".to_string(), "Поговорить".to_string()],
                vec!["Выводы".to_string(), "Очистить историю".to_string()],
            ]
        );
        assert!(kb.resize);
        assert!(!kb.one_time);
    }
}
