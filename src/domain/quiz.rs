use crate::domain::models::{Choice, Question};
use serde::Serialize;

pub const DAILY_QUESTIONS: usize = 5;

/// Linear congruential generator seeded from a calendar key. Every
/// device derives the same sequence from the same key.
struct DailyRng {
    seed: u64,
}

impl DailyRng {
    fn from_key(date_key: &str) -> Self {
        let seed = date_key.encode_utf16().map(u64::from).sum::<u64>() % 233_280;
        Self { seed }
    }

    fn next_unit(&mut self) -> f64 {
        self.seed = (self.seed * 9301 + 49297) % 233_280;
        self.seed as f64 / 233_280.0
    }
}

/// Deterministic daily subset: shuffle the whole pool with a generator
/// seeded by `date_key`, keep the first five.
pub fn select_daily(pool: &[Question], date_key: &str) -> Vec<Question> {
    let mut rng = DailyRng::from_key(date_key);
    let mut shuffled = pool.to_vec();
    for i in (1..shuffled.len()).rev() {
        let j = ((rng.next_unit() * (i + 1) as f64) as usize).min(i);
        shuffled.swap(i, j);
    }
    shuffled.truncate(DAILY_QUESTIONS);
    shuffled
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnswerOutcome {
    Recorded {
        correct: bool,
        correct_choice: Choice,
        analysis: String,
    },
    /// The current question already has an answer, or the session is over.
    Ignored,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "progress", rename_all = "snake_case")]
pub enum Progress {
    Next { index: usize },
    /// Returned when the last question is left, and again on every
    /// advance until the score is marked saved.
    Finished { score: u32 },
    AwaitingAnswer,
    AlreadyFinished,
}

#[derive(Debug, Clone)]
pub struct QuizSession {
    date_key: String,
    questions: Vec<Question>,
    index: usize,
    score: u32,
    selected: Option<Choice>,
    finished: bool,
    saved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizView {
    pub date_key: String,
    pub index: usize,
    pub total: usize,
    pub score: u32,
    pub finished: bool,
    pub question: Option<QuestionView>,
    pub selected: Option<Choice>,
}

/// A question without its answer key.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: i64,
    pub question: String,
    pub options: Vec<(Choice, String)>,
}

impl QuizSession {
    pub fn start(pool: &[Question], date_key: &str) -> Self {
        Self {
            date_key: date_key.to_string(),
            questions: select_daily(pool, date_key),
            index: 0,
            score: 0,
            selected: None,
            finished: false,
            saved: false,
        }
    }

    pub fn current(&self) -> Option<&Question> {
        if self.finished {
            return None;
        }
        self.questions.get(self.index)
    }

    /// Call once the final score has been persisted.
    pub fn mark_saved(&mut self) {
        if self.finished {
            self.saved = true;
        }
    }

    pub fn answer(&mut self, choice: Choice) -> AnswerOutcome {
        if self.selected.is_some() {
            return AnswerOutcome::Ignored;
        }
        let Some(question) = self.current() else {
            return AnswerOutcome::Ignored;
        };
        let correct = question.answer == choice;
        let outcome = AnswerOutcome::Recorded {
            correct,
            correct_choice: question.answer,
            analysis: question.analysis.clone(),
        };
        if correct {
            self.score += 1;
        }
        self.selected = Some(choice);
        outcome
    }

    pub fn advance(&mut self) -> Progress {
        if self.finished {
            if self.saved {
                return Progress::AlreadyFinished;
            }
            return Progress::Finished { score: self.score };
        }
        if self.selected.is_none() {
            return Progress::AwaitingAnswer;
        }
        self.selected = None;
        if self.index + 1 < self.questions.len() {
            self.index += 1;
            Progress::Next { index: self.index }
        } else {
            self.finished = true;
            Progress::Finished { score: self.score }
        }
    }

    pub fn view(&self) -> QuizView {
        let question = self.current().map(|q| {
            let mut options = vec![(Choice::A, q.option_a.clone()), (Choice::B, q.option_b.clone())];
            if let Some(c) = &q.option_c {
                options.push((Choice::C, c.clone()));
            }
            if let Some(d) = &q.option_d {
                options.push((Choice::D, d.clone()));
            }
            QuestionView {
                id: q.id,
                question: q.question.clone(),
                options,
            }
        });
        QuizView {
            date_key: self.date_key.clone(),
            index: self.index,
            total: self.questions.len(),
            score: self.score,
            finished: self.finished,
            question,
            selected: self.selected,
        }
    }
}
