//! Question pool and pre-assembled sequence store.
//!
//! The pool holds immutable picture-trivia questions; the store holds the
//! twelve canonical sequences ({30s, 45s} x {FLAT, ASCENDING, DESCENDING} x 2
//! variants) the matchmaker picks from. Sequences are longer than the maximum
//! answerable count, and repeats within one sequence are permitted because
//! the pool can be smaller than the target length.

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use rand::seq::SliceRandom;
use rustc_hash::FxHashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::core_types::{QuestionId, SequenceId};
use crate::error::{DuelError, DuelResult};
use crate::models::{
    CHOICES_PER_QUESTION, Difficulty, MatchDuration, Question, QuestionSequence, SequenceItem,
    SequenceMetadata, SequenceStrategy,
};

/// Upper bound on one write batch during bulk upload.
pub const UPLOAD_BATCH_SIZE: usize = 400;

/// Canonical variants generated per (duration, strategy) pair.
pub const VARIANTS_PER_COMBO: usize = 2;

// ============================================================
// REPORTS & STATS
// ============================================================

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub uploaded: usize,
    pub batches: usize,
}

/// Per-question structural validation outcome (admin surface).
#[derive(Debug, Clone, Serialize)]
pub struct QuestionValidation {
    pub question_id: QuestionId,
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionStats {
    pub total: usize,
    pub by_difficulty: FxHashMap<String, usize>,
    pub by_category: FxHashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceStats {
    pub total: usize,
    pub by_duration: FxHashMap<u32, usize>,
    pub by_strategy: FxHashMap<String, usize>,
}

// ============================================================
// POOL
// ============================================================

#[derive(Debug, Default)]
pub struct QuestionPool {
    questions: DashMap<QuestionId, Question>,
    sequences: DashMap<SequenceId, QuestionSequence>,
}

impl QuestionPool {
    pub fn new() -> Self {
        Self::default()
    }

    // --------------------------------------------------------
    // Questions
    // --------------------------------------------------------

    /// Structure-validate the whole batch, then write it in bounded-size
    /// chunks. Nothing is written when any question fails validation.
    pub fn upload_question_batch(&self, questions: Vec<Question>) -> DuelResult<BatchReport> {
        if questions.is_empty() {
            return Err(DuelError::invalid("empty question batch"));
        }
        for q in &questions {
            validate_question(q)
                .map_err(|e| DuelError::invalid(format!("question {}: {e}", q.question_id)))?;
        }

        let total = questions.len();
        let mut batches = 0;
        let mut iter = questions.into_iter().peekable();
        while iter.peek().is_some() {
            for q in iter.by_ref().take(UPLOAD_BATCH_SIZE) {
                self.questions.insert(q.question_id.clone(), q);
            }
            batches += 1;
        }

        tracing::info!(uploaded = total, batches, "question batch uploaded");
        Ok(BatchReport {
            uploaded: total,
            batches,
        })
    }

    /// Dry-run validation for the admin surface; writes nothing.
    pub fn validate_questions(&self, questions: &[Question]) -> Vec<QuestionValidation> {
        questions
            .iter()
            .map(|q| {
                let errors = validation_errors(q);
                QuestionValidation {
                    question_id: q.question_id.clone(),
                    valid: errors.is_empty(),
                    errors,
                }
            })
            .collect()
    }

    pub fn get_question(&self, question_id: &str) -> DuelResult<Question> {
        self.questions
            .get(question_id)
            .map(|q| q.clone())
            .ok_or_else(|| DuelError::not_found(format!("question {question_id}")))
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn question_stats(&self) -> QuestionStats {
        let mut by_difficulty = FxHashMap::default();
        let mut by_category = FxHashMap::default();
        for q in self.questions.iter() {
            *by_difficulty
                .entry(q.difficulty.as_str().to_string())
                .or_insert(0) += 1;
            *by_category.entry(q.category.clone()).or_insert(0) += 1;
        }
        QuestionStats {
            total: self.questions.len(),
            by_difficulty,
            by_category,
        }
    }

    // --------------------------------------------------------
    // Sequences
    // --------------------------------------------------------

    /// Rebuild the twelve canonical sequences from the current pool.
    /// Replaces any previously generated set.
    pub fn generate_sequences(&self) -> DuelResult<Vec<SequenceId>> {
        if self.questions.is_empty() {
            return Err(DuelError::invalid(
                "cannot generate sequences from an empty question pool",
            ));
        }

        let mut buckets: FxHashMap<Difficulty, Vec<Question>> = FxHashMap::default();
        for q in self.questions.iter() {
            buckets.entry(q.difficulty).or_default().push(q.clone());
        }
        let all: Vec<Question> = self.questions.iter().map(|q| q.clone()).collect();

        self.sequences.clear();
        let mut rng = rand::thread_rng();
        let mut ids = Vec::new();
        for duration in MatchDuration::ALL {
            for strategy in SequenceStrategy::ALL {
                for _ in 0..VARIANTS_PER_COMBO {
                    let seq = build_sequence(duration, strategy, &buckets, &all, &mut rng);
                    ids.push(seq.sequence_id.clone());
                    self.sequences.insert(seq.sequence_id.clone(), seq);
                }
            }
        }

        tracing::info!(count = ids.len(), "canonical sequences generated");
        Ok(ids)
    }

    /// Uniform pick over sequences matching the duration.
    pub fn pick_random(&self, duration: MatchDuration) -> DuelResult<SequenceId> {
        let candidates: Vec<SequenceId> = self
            .sequences
            .iter()
            .filter(|s| s.duration == duration)
            .map(|s| s.sequence_id.clone())
            .collect();
        candidates
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| {
                DuelError::not_found(format!("sequence for duration {}s", duration.secs()))
            })
    }

    pub fn get_sequence(&self, sequence_id: &str) -> DuelResult<QuestionSequence> {
        self.sequences
            .get(sequence_id)
            .map(|s| s.clone())
            .ok_or_else(|| DuelError::not_found(format!("sequence {sequence_id}")))
    }

    pub fn sequence_stats(&self) -> SequenceStats {
        let mut by_duration = FxHashMap::default();
        let mut by_strategy = FxHashMap::default();
        for s in self.sequences.iter() {
            *by_duration.entry(s.duration.secs()).or_insert(0) += 1;
            *by_strategy
                .entry(s.strategy.as_str().to_string())
                .or_insert(0) += 1;
        }
        SequenceStats {
            total: self.sequences.len(),
            by_duration,
            by_strategy,
        }
    }
}

// ============================================================
// VALIDATION
// ============================================================

fn validation_errors(q: &Question) -> Vec<String> {
    let mut errors = Vec::new();
    if q.stem.trim().is_empty() {
        errors.push("stem is empty".to_string());
    }
    if q.choices.len() != CHOICES_PER_QUESTION {
        errors.push(format!(
            "expected {} choices, got {}",
            CHOICES_PER_QUESTION,
            q.choices.len()
        ));
    }
    let mut urls: Vec<&str> = q.choices.iter().map(|c| c.image_url.as_str()).collect();
    urls.sort_unstable();
    urls.dedup();
    if urls.len() != q.choices.len() {
        errors.push("choice images must be distinct".to_string());
    }
    let correct_count = q.choices.iter().filter(|c| c.is_correct).count();
    if correct_count != 1 {
        errors.push(format!("expected exactly 1 correct choice, got {correct_count}"));
    }
    match q.choices.get(q.correct_index as usize) {
        Some(choice) if choice.is_correct => {}
        Some(_) => errors.push(format!(
            "correct_index {} does not point at the correct choice",
            q.correct_index
        )),
        None => errors.push(format!("correct_index {} out of range", q.correct_index)),
    }
    errors
}

fn validate_question(q: &Question) -> Result<(), String> {
    let errors = validation_errors(q);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

// ============================================================
// SEQUENCE ASSEMBLY
// ============================================================

/// Exact per-difficulty counts for a sequence; the mixes divide the target
/// lengths without remainder.
fn difficulty_counts(duration: MatchDuration, strategy: SequenceStrategy) -> (usize, usize, usize) {
    let len = duration.sequence_len();
    let (e, m, h) = strategy.mix();
    (
        len * e as usize / 100,
        len * m as usize / 100,
        len * h as usize / 100,
    )
}

/// Fisher-Yates draw of `n` questions from a bucket, cycling through
/// reshuffles when the bucket is smaller than the request. Falls back to the
/// whole pool when the bucket has no questions at all.
fn draw<'a>(
    bucket: Option<&'a [Question]>,
    fallback: &'a [Question],
    n: usize,
    rng: &mut impl Rng,
) -> Vec<&'a Question> {
    let source = match bucket {
        Some(b) if !b.is_empty() => b,
        _ => fallback,
    };
    let mut order: Vec<usize> = (0..source.len()).collect();
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        order.shuffle(rng);
        for &i in &order {
            if out.len() == n {
                break;
            }
            out.push(&source[i]);
        }
    }
    out
}

fn build_sequence(
    duration: MatchDuration,
    strategy: SequenceStrategy,
    buckets: &FxHashMap<Difficulty, Vec<Question>>,
    all: &[Question],
    rng: &mut impl Rng,
) -> QuestionSequence {
    let (easy_n, medium_n, hard_n) = difficulty_counts(duration, strategy);

    let easy = draw(buckets.get(&Difficulty::Easy).map(Vec::as_slice), all, easy_n, rng);
    let medium = draw(
        buckets.get(&Difficulty::Medium).map(Vec::as_slice),
        all,
        medium_n,
        rng,
    );
    let hard = draw(buckets.get(&Difficulty::Hard).map(Vec::as_slice), all, hard_n, rng);

    let mut picked: Vec<&Question> = Vec::with_capacity(duration.sequence_len());
    match strategy {
        SequenceStrategy::Ascending => {
            picked.extend(easy);
            picked.extend(medium);
            picked.extend(hard);
        }
        SequenceStrategy::Descending => {
            picked.extend(hard);
            picked.extend(medium);
            picked.extend(easy);
        }
        SequenceStrategy::Flat => {
            picked.extend(easy);
            picked.extend(medium);
            picked.extend(hard);
            picked.shuffle(rng);
        }
    }

    let mut metadata = SequenceMetadata {
        allows_repeats: true,
        ..Default::default()
    };
    let questions: Vec<SequenceItem> = picked
        .iter()
        .enumerate()
        .map(|(i, q)| {
            match q.difficulty {
                Difficulty::Easy => metadata.easy_count += 1,
                Difficulty::Medium => metadata.medium_count += 1,
                Difficulty::Hard => metadata.hard_count += 1,
            }
            SequenceItem {
                question_id: q.question_id.clone(),
                order: i as u32,
                difficulty: q.difficulty,
            }
        })
        .collect();

    QuestionSequence {
        sequence_id: Uuid::new_v4().to_string(),
        duration,
        strategy,
        questions,
        metadata,
        created_at: Utc::now(),
    }
}

// ============================================================
// TESTS
// ============================================================
