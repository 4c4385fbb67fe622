//! Per-channel survey cursors.
//!
//! A survey channel is tracked from the moment its first question is sent
//! until the requester answers the last one. Nothing here is persisted: a
//! restart drops every in-flight survey, which is safe because no platform
//! resources exist for a request until it is approved.

use std::collections::HashMap;

use crate::model::ChannelId;

/// Outcome of feeding one message to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurveyStep {
    /// Channel not tracked, or the author is staff commenting on the survey.
    Ignored,
    /// Send this question next.
    Ask(String),
    /// All questions answered; the channel is no longer tracked.
    Complete,
}

#[derive(Debug, Clone)]
pub struct SurveyTracker {
    questions: Vec<String>,
    /// Number of questions already sent, per channel.
    cursors: HashMap<ChannelId, usize>,
}

impl SurveyTracker {
    pub fn new(questions: Vec<String>) -> Self {
        Self {
            questions,
            cursors: HashMap::new(),
        }
    }

    /// The opening question, sent by the caller before `start`.
    pub fn first_question(&self) -> Option<&str> {
        self.questions.first().map(String::as_str)
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    /// Begin tracking `channel`; question 0 has already been sent.
    pub fn start(&mut self, channel: ChannelId) {
        self.cursors.insert(channel, 1);
    }

    pub fn is_tracked(&self, channel: ChannelId) -> bool {
        self.cursors.contains_key(&channel)
    }

    pub fn advance(&mut self, channel: ChannelId, author_is_approver: bool) -> SurveyStep {
        let Some(cursor) = self.cursors.get_mut(&channel) else {
            return SurveyStep::Ignored;
        };
        if author_is_approver {
            return SurveyStep::Ignored;
        }
        if *cursor < self.questions.len() {
            let question = self.questions[*cursor].clone();
            *cursor += 1;
            SurveyStep::Ask(question)
        } else {
            self.cursors.remove(&channel);
            SurveyStep::Complete
        }
    }

    /// Stop tracking without completing. Returns whether it was tracked.
    pub fn abort(&mut self, channel: ChannelId) -> bool {
        self.cursors.remove(&channel).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SurveyTracker {
        SurveyTracker::new(vec!["q0".into(), "q1".into(), "q2".into()])
    }

    #[test]
    fn walks_through_questions_then_completes() {
        let mut t = tracker();
        let ch = ChannelId(1);
        t.start(ch);

        assert_eq!(t.advance(ch, false), SurveyStep::Ask("q1".into()));
        assert_eq!(t.advance(ch, false), SurveyStep::Ask("q2".into()));
        assert_eq!(t.advance(ch, false), SurveyStep::Complete);
        assert!(!t.is_tracked(ch));
        assert_eq!(t.advance(ch, false), SurveyStep::Ignored);
    }

    #[test]
    fn approver_messages_do_not_advance() {
        let mut t = tracker();
        let ch = ChannelId(1);
        t.start(ch);
        assert_eq!(t.advance(ch, true), SurveyStep::Ignored);
        assert_eq!(t.advance(ch, false), SurveyStep::Ask("q1".into()));
    }

    #[test]
    fn untracked_channel_is_ignored() {
        let mut t = tracker();
        assert_eq!(t.advance(ChannelId(9), false), SurveyStep::Ignored);
    }

    #[test]
    fn abort_drops_tracking() {
        let mut t = tracker();
        let ch = ChannelId(1);
        t.start(ch);
        assert!(t.abort(ch));
        assert!(!t.abort(ch));
        assert_eq!(t.advance(ch, false), SurveyStep::Ignored);
    }

    #[test]
    fn single_question_survey_completes_on_first_answer() {
        let mut t = SurveyTracker::new(vec!["only".into()]);
        let ch = ChannelId(3);
        t.start(ch);
        assert_eq!(t.advance(ch, false), SurveyStep::Complete);
    }

    #[test]
    fn channels_are_independent() {
        let mut t = tracker();
        t.start(ChannelId(1));
        t.start(ChannelId(2));
        assert_eq!(t.advance(ChannelId(1), false), SurveyStep::Ask("q1".into()));
        assert_eq!(t.advance(ChannelId(2), false), SurveyStep::Ask("q1".into()));
        assert_eq!(t.advance(ChannelId(1), false), SurveyStep::Ask("q2".into()));
    }
}
