//! Quiz service loop
//!
//! The top-level control loop. Two states: IDLE (no question outstanding)
//! and WAITING (question sent, reply pending). Each tick performs at most
//! one send-check and one response-check, then the loop sleeps for the poll
//! interval. Delivery and grading failures are recovered locally by state
//! transitions; nothing in steady-state operation terminates the loop.

use anyhow::{Result, Context};
use chrono::{Duration, Utc};
use tracing::{info, warn, error, debug};

use crate::bank::QuestionBank;
use crate::classify;
use crate::config::Config;
use crate::grader::{format_feedback, Grader};
use crate::mail::MailChannel;
use crate::select;
use crate::store::{ProgressEntry, ProgressLog, ScoreLedger, SessionState, SessionStore};

/// Result of a single loop tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing due yet
    Idle,
    /// A new question went out
    QuestionSent(usize),
    /// Delivery failed; the next eligible tick retries
    SendFailed(String),
    /// Still waiting, no genuine reply in the thread
    WaitingNoReply,
    /// Thread poll failed; retried next tick
    PollFailed(String),
    /// The wait exceeded twice the question interval and was abandoned
    TimedOut,
    /// A reply was graded and feedback delivered
    Graded { question_id: Option<usize>, score: u32 },
    /// Grading or feedback delivery failed; the round was skipped
    GradingFailed(String),
}

impl std::fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickOutcome::Idle => write!(f, "idle"),
            TickOutcome::QuestionSent(id) => write!(f, "sent question {id}"),
            TickOutcome::SendFailed(e) => write!(f, "send failed: {e}"),
            TickOutcome::WaitingNoReply => write!(f, "waiting, no reply yet"),
            TickOutcome::PollFailed(e) => write!(f, "poll failed: {e}"),
            TickOutcome::TimedOut => write!(f, "wait timed out"),
            TickOutcome::Graded { score, .. } => write!(f, "graded {score}/100"),
            TickOutcome::GradingFailed(e) => write!(f, "grading failed: {e}"),
        }
    }
}

/// The quiz service: bank, stores, and the two collaborators
pub struct QuizService {
    config: Config,
    subject: String,
    bank: QuestionBank,
    session: SessionStore,
    ledger: ScoreLedger,
    progress: ProgressLog,
    channel: Box<dyn MailChannel>,
    grader: Box<dyn Grader>,
}

impl QuizService {
    /// Load the bank and stores and wire up the collaborators. Stale
    /// session state from a changed bank is repaired here.
    pub fn new(
        config: Config,
        subject_override: Option<String>,
        channel: Box<dyn MailChannel>,
        grader: Box<dyn Grader>,
    ) -> Result<Self> {
        let bank = QuestionBank::load(&config.questions_path()?)?;

        let mut session = SessionStore::load(&config.state_path()?, config.seed_thread_id());
        if session.invalidate_stale_ids(bank.len()) {
            session.save()?;
        }

        let ledger = ScoreLedger::load(&config.scores_path()?);
        let progress = ProgressLog::load(&config.progress_path()?);
        let subject = subject_override.unwrap_or_else(|| config.email.subject.clone());

        Ok(Self {
            config,
            subject,
            bank,
            session,
            ledger,
            progress,
            channel,
            grader,
        })
    }

    pub fn session_state(&self) -> &SessionState {
        &self.session.state
    }

    #[cfg(test)]
    pub(crate) fn session_state_mut(&mut self) -> &mut SessionState {
        &mut self.session.state
    }

    pub fn ledger(&self) -> &ScoreLedger {
        &self.ledger
    }

    pub fn progress(&self) -> &ProgressLog {
        &self.progress
    }

    fn question_interval(&self) -> Duration {
        Duration::minutes(self.config.service.question_interval_minutes as i64)
    }

    /// Whether a new question is due: never sent, previous send failed, or
    /// the interval has elapsed
    fn should_send_question(&self) -> bool {
        let state = &self.session.state;
        let Some(last) = state.last_question_time else {
            debug!("Ready to send: no previous question");
            return true;
        };
        if state.sent_message_id.is_none() {
            debug!("Ready to send: previous send left no message id");
            return true;
        }
        let elapsed = Utc::now() - last;
        if elapsed >= self.question_interval() {
            true
        } else {
            let remaining = self.question_interval() - elapsed;
            debug!(
                "Not time yet: {:.1} minutes until the next question",
                remaining.num_seconds() as f64 / 60.0
            );
            false
        }
    }

    /// Whether the current wait has outlived twice the question interval
    fn wait_timed_out(&self) -> bool {
        match self.session.state.last_question_time {
            Some(last) => Utc::now() - last >= self.question_interval() * 2,
            None => false,
        }
    }

    /// One iteration of the state machine
    pub async fn tick(&mut self) -> TickOutcome {
        if !self.session.state.waiting_for_response && self.should_send_question() {
            return self.send_question().await;
        }

        if self.session.state.waiting_for_response {
            if self.wait_timed_out() {
                info!("Timeout: no response received, abandoning the wait");
                self.session.state.waiting_for_response = false;
                self.session.state.sent_message_id = None;
                self.persist();
                return TickOutcome::TimedOut;
            }

            return match self.check_for_response().await {
                Ok(Some(reply)) => self.grade_and_send_feedback(&reply).await,
                Ok(None) => TickOutcome::WaitingNoReply,
                Err(e) => {
                    warn!("Error checking for response: {e:#}");
                    TickOutcome::PollFailed(format!("{e:#}"))
                }
            };
        }

        TickOutcome::Idle
    }

    /// IDLE -> WAITING: pick a question and deliver it
    async fn send_question(&mut self) -> TickOutcome {
        let id = match select::select(&self.bank, &self.ledger, &mut self.session.state.recent_questions) {
            Ok(id) => id,
            Err(e) => return TickOutcome::SendFailed(format!("{e:#}")),
        };
        let question = self
            .bank
            .get(id)
            .expect("selector only returns ids inside the bank")
            .clone();

        info!("Sending question {}: {}", id, preview(&question.text));

        let thread_id = self.session.state.thread_id.clone();
        match self
            .channel
            .send_message(&question.text, thread_id.as_deref(), &self.subject)
            .await
        {
            Ok(sent) => {
                let timestamp = match self.channel.message_timestamp(&sent.message_id).await {
                    Ok(ts) => ts,
                    Err(e) => {
                        warn!("Could not resolve send timestamp, using now: {e:#}");
                        Utc::now().timestamp_millis()
                    }
                };

                let state = &mut self.session.state;
                state.current_question_id = Some(id);
                state.current_question = Some(question.text.clone());
                state.current_answer = Some(question.correct_answer.clone());
                state.sent_message_id = Some(sent.message_id.clone());
                state.sent_message_timestamp = Some(timestamp);
                state.thread_id = Some(sent.thread_id.clone());
                state.last_question_time = Some(Utc::now());
                state.waiting_for_response = true;
                state.push_sent_message_id(sent.message_id.clone());
                self.persist();

                info!(
                    "Question sent (message {}, thread {}), waiting for response",
                    sent.message_id, sent.thread_id
                );
                TickOutcome::QuestionSent(id)
            }
            Err(e) => {
                // Self-healing: a cleared message id makes the next tick retry
                error!("Error sending question: {e:#}");
                self.session.state.waiting_for_response = false;
                self.session.state.sent_message_id = None;
                self.persist();
                TickOutcome::SendFailed(format!("{e:#}"))
            }
        }
    }

    /// Poll the thread and classify whatever arrived
    async fn check_for_response(&self) -> Result<Option<String>> {
        let state = &self.session.state;
        let (Some(thread_id), Some(sent_message_id)) =
            (state.thread_id.clone(), state.sent_message_id.clone())
        else {
            return Ok(None);
        };

        let sent_timestamp = match state.sent_message_timestamp {
            Some(ts) => ts,
            None => self
                .channel
                .message_timestamp(&sent_message_id)
                .await
                .unwrap_or(0),
        };

        let excluded = state.excluded_message_ids();
        let question_text = state.current_question.clone().unwrap_or_default();

        let messages = self
            .channel
            .fetch_thread(&thread_id)
            .await
            .context("Failed to poll the quiz thread")?;
        debug!("Checking thread with {} messages", messages.len());

        Ok(classify::classify(
            &messages,
            &sent_message_id,
            sent_timestamp,
            &excluded,
            &self.config.email.target_email,
            &question_text,
            &self.config.classifier,
        ))
    }

    /// WAITING -> IDLE: grade the reply, record it, send feedback
    async fn grade_and_send_feedback(&mut self, reply: &str) -> TickOutcome {
        let state = &self.session.state;
        let (Some(question), Some(answer)) =
            (state.current_question.clone(), state.current_answer.clone())
        else {
            warn!("Waiting state had no question; abandoning the round");
            self.session.state.clear_waiting();
            self.persist();
            return TickOutcome::GradingFailed("missing question in session state".into());
        };
        let question_id = state.current_question_id;
        let thread_id = state.thread_id.clone();

        info!("Grading response: {}", preview(reply));

        let grade = match self.grader.grade(reply, &answer, &question).await {
            Ok(grade) => grade,
            Err(e) => {
                // Skip the round rather than block the loop; no score recorded
                warn!("Error grading response: {e:#}");
                self.session.state.clear_waiting();
                self.persist();
                return TickOutcome::GradingFailed(format!("{e:#}"));
            }
        };

        if let Some(id) = question_id {
            if let Err(e) = self.ledger.record(id, grade.score) {
                warn!("Could not persist score: {e:#}");
            }
            info!(
                "Score recorded: {}/100 (average {:.1}/100)",
                grade.score,
                self.ledger.average(id)
            );
        }

        let feedback = format_feedback(&grade, &answer);
        match &thread_id {
            Some(thread) => {
                match self
                    .channel
                    .send_message(&feedback, Some(thread), &self.subject)
                    .await
                {
                    Ok(sent) => {
                        self.session.state.push_sent_message_id(sent.message_id);
                    }
                    Err(e) => {
                        warn!("Error sending feedback: {e:#}");
                        self.session.state.clear_waiting();
                        self.persist();
                        return TickOutcome::GradingFailed(format!("feedback delivery: {e:#}"));
                    }
                }
            }
            None => warn!("No thread to deliver feedback into"),
        }

        if let Err(e) = self.progress.append(ProgressEntry {
            timestamp: Utc::now(),
            question_id,
            question,
            response: reply.to_string(),
            feedback,
            score: grade.score,
        }) {
            warn!("Could not persist progress entry: {e:#}");
        }

        info!("Feedback sent, score {}/100", grade.score);
        self.session.state.clear_waiting();
        self.persist();

        TickOutcome::Graded {
            question_id,
            score: grade.score,
        }
    }

    /// Persist session state; failures are logged, never fatal to the loop
    fn persist(&self) {
        if let Err(e) = self.session.save() {
            error!("Could not persist session state: {e:#}");
        }
    }

    /// Run until interrupted. A timed-out wait re-evaluates immediately;
    /// every other outcome sleeps the poll interval.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Quiz service started (target {}, question interval {}m, poll {}s)",
            self.config.email.target_email,
            self.config.service.question_interval_minutes,
            self.config.service.poll_interval_secs
        );

        loop {
            let outcome = self.tick().await;
            match &outcome {
                TickOutcome::Idle | TickOutcome::WaitingNoReply => debug!("{outcome}"),
                TickOutcome::SendFailed(_) | TickOutcome::PollFailed(_) | TickOutcome::GradingFailed(_) => {
                    warn!("{outcome}")
                }
                _ => info!("{outcome}"),
            }

            if outcome == TickOutcome::TimedOut {
                continue;
            }

            let sleep = std::time::Duration::from_secs(self.config.service.poll_interval_secs);
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, saving state");
                    self.session.save().context("Failed to save state on shutdown")?;
                    return Ok(());
                }
            }
        }
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 100;
    if text.chars().count() > LIMIT {
        let head: String = text.chars().take(LIMIT).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
