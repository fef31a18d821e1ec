//! Vova's voice: prompts, fixed replies, and the two flow definitions.

use crate::session::{LinearFlow, Stage};
use crate::store::CompletionRecord;

/// System prompt for analyses.
pub const SYSTEM_PROMPT: &str = "Ты — психолог по прозвищу Вова. Ты говоришь дерзко, тепло, с иронией, \
но всегда по делу и с заботой. Ты разбираешь сообщения пользователей в стиле схемотерапии, РЭПТ и \
поддержки. Не используй термины, говори просто и по-человечески.

Твоя задача — проанализировать ситуацию, описанную человеком, и:
1. Понять, какие потребности не удовлетворены
2. Заметить активные схемы
3. Помочь понять режим
4. Дать поддержку и идеи, как быть бережнее к себе

Если в памяти есть предыдущие сообщения — учитывай их.";

/// System prompt for phrasing intake questions.
pub const QUESTION_SYSTEM_PROMPT: &str = "Ты — Вова, тёплый и немного ироничный психолог. \
Ты ведёшь короткий разбор по шагам и задаёшь ровно один вопрос за раз. Без анализа, без советов, \
без терминов. Один-два предложения.";

pub const ANALYSIS_TEMPERATURE: f32 = 0.8;
pub const SUMMARY_TEMPERATURE: f32 = 0.7;

// ── Fixed replies ───────────────────────────────────────────────────

pub const START_TEXT: &str = "Я Вова. Говорю жёстко, но с заботой. Помню, что ты пишешь — чтобы помогать точнее.\n\
Команды: /анализ, /поговорить, /разбор, /теги, /выводы, /очистить_историю, /профиль, /о_вове.";

pub const HELP_TEXT: &str = "Что я умею:\n\
/анализ <текст> (/analyze) — разберу, что у тебя внутри\n\
/поговорить (/talk) — задам вопросы по одному\n\
/разбор (/intake) — разберём ситуацию по шагам: запрос, эмоции, мысли, искажения\n\
/выводы (/summary) — сводка по последним разговорам\n\
/теги (/tags) — о чём ты пишешь чаще всего\n\
/профиль (/profile) — скажи, как тебя звать\n\
/очистить_историю (/reset) — стереть всё, что я помню\n\
/о_вове (/about) — кто я такой\n\n\
Или просто напиши, что происходит.";

pub const ABOUT_TEXT: &str = "Я — Вова. Не врач, не гуру, не маг. Я просто бот, который:\n\
— помогает тебе разобраться в себе\n\
— запоминает твои прошлые сообщения (только для тебя)\n\
— ничего не публикует и никому не передаёт\n\
— может стереть всё по команде /очистить_историю\n\n\
Всё, что ты пишешь — остаётся между нами.";

pub const ANALYZE_INVITE: &str = "Пиши, что у тебя внутри — я разложу по полочкам.";

pub const SUMMARY_EMPTY: &str = "Пока не с чем делать сводку.";
pub const TAGS_EMPTY: &str = "Пока нечего тэгать. Надо накидать мыслей.";
pub const TAGS_HEADER: &str = "Похоже, ты часто упоминаешь:";

pub const RESET_DONE: &str = "Окей. Всё забыто. Новый лист — чистый.";
pub const RESET_NOTHING: &str = "У меня и не было ничего твоего. Всё чисто.";

pub const PROFILE_ASK: &str =
    "Окей, давай чуть настроимся. Как мне тебя звать? Или можешь пропустить — мне норм.";
pub const PROFILE_REJECTED: &str = "Слушай, это не похоже на имя. Давай без.";
pub const PROFILE_SAVED: &str = "Профиль сохранён. Пиши, когда будешь готова.";

pub const VOICE_UNHEARD: &str =
    "Не расслышал голосовое. Попробуй ещё раз или напиши текстом — я тут.";

pub const UNKNOWN_COMMAND: &str = "Такой команды я не знаю.";

/// Reply to an accepted name.
pub fn profile_accepted(name: &str) -> String {
    format!("Принято. Буду звать тебя {name}. Или забуду.")
}

/// `/start` greeting, personal when the name is known.
pub fn greeting(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("Привет, {name}.\n{START_TEXT}"),
        None => START_TEXT.to_string(),
    }
}

/// Prompt asking for a summary of recent records.
pub fn summary_prompt(records: &[CompletionRecord]) -> String {
    let excerpts = records
        .iter()
        .map(|r| format!("{}\n{}", r.input_text, r.response_text))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Ты — психолог. Вот выдержки из сессий:\n{excerpts}\n\
Сделай краткую сводку: какие темы поднимаются, какие эмоции, и что важно помнить человеку?"
    )
}

// ── Flows ───────────────────────────────────────────────────────────

pub const TALK_OPENING: &str = "Начнём. Я буду задавать тебе вопросы один за другим. Пиши честно, ок?";

pub const TALK_QUESTIONS: [&str; 7] = [
    "Окей. Что с тобой сейчас происходит? Опиши это в паре предложений.",
    "А что ты чувствуешь в теле, когда об этом думаешь?",
    "Какая мысль приходит первой в голову, когда ты это переживаешь?",
    "Если бы эта мысль была фразой, которую ты говоришь себе — как бы она звучала?",
    "А если представить, что это говорит твой внутренний критик — что бы он тебе сказал?",
    "Теперь скажи: а что бы ты сказала подруге, если бы она оказалась в такой ситуации?",
    "Что ты можешь сделать, чтобы быть к себе мягче прямо сейчас?",
];

pub const TALK_CLOSING: &str =
    "Спасибо, что прошла это со мной. Ты большая умница. Хочешь — можешь написать ещё, я рядом.";

pub const INTAKE_OPENING: &str = "Давай разберём по шагам. Я спрошу немного, потом соберу всё вместе.";

const ANALYSIS_TEMPLATE: &str = "Вот что человек рассказал о себе.\n\
Запрос: {request}\n\
Эмоции: {emotions}\n\
Мысли: {thoughts}\n\
Где, по его мнению, он себя накручивает: {cognitive_distortions}\n\n\
Разбери это: какие потребности не удовлетворены, какие схемы активны, какой режим включён \
и как быть к себе бережнее.";

/// The scripted "talk" questionnaire.
pub fn talk_flow() -> LinearFlow {
    LinearFlow::script("talk", Some(TALK_OPENING), TALK_QUESTIONS, TALK_CLOSING)
}

/// The four-stage intake that ends in an analysis.
pub fn intake_flow() -> LinearFlow {
    let stages = vec![
        Stage::new("request", "Что случилось? Опиши, с чем ты пришла."),
        Stage::new(
            "emotions",
            "Что ты сейчас чувствуешь? Назови эмоции, как получится.",
        )
        .with_follow_up(
            "Человек пишет: «{request}». Спроси, какие эмоции он сейчас испытывает.",
        ),
        Stage::new(
            "thoughts",
            "Какие мысли крутятся в голове, когда ты об этом думаешь?",
        )
        .with_follow_up(
            "Человек пишет: «{request}». Он чувствует: «{emotions}». \
Спроси, какие мысли у него появляются в этой ситуации.",
        ),
        Stage::new(
            "cognitive_distortions",
            "Посмотри на эти мысли со стороны. Где ты, возможно, преувеличиваешь, \
обобщаешь или додумываешь за других?",
        )
        .with_follow_up(
            "Человек думает: «{thoughts}». Мягко спроси, где в этих мыслях он может \
преувеличивать, обобщать или читать чужие мысли.",
        ),
    ];

    LinearFlow::intake(
        "intake",
        Some(INTAKE_OPENING),
        stages,
        SYSTEM_PROMPT,
        ANALYSIS_TEMPLATE,
    )
    .with_question_system_prompt(QUESTION_SYSTEM_PROMPT)
    .with_analysis_temperature(ANALYSIS_TEMPERATURE)
}
