//! Session shell: one user's conversation on top of the pipeline

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::{
    error::{Error, Result},
    history::{ChatHistory, ChatRole},
    pipeline::Pipeline,
    state::{PipelineInput, ThreadId},
};

/// Shown when an analysis produced no text
pub const NO_RESULT_PLACEHOLDER: &str = "No result.";
/// Shown when a follow-up produced no text
pub const NO_RESPONSE_PLACEHOLDER: &str = "No response.";
pub const ANALYSIS_LABEL: &str = "Nutrition Analysis";

fn or_placeholder(text: Option<&str>, placeholder: &str) -> String {
    text.filter(|t| !t.trim().is_empty())
        .unwrap_or(placeholder)
        .to_string()
}

/// Tracks thread identity, chat history and the result the next follow-up
/// is asked against.
pub struct Session {
    pipeline: Arc<Pipeline>,
    thread_id: ThreadId,
    history: ChatHistory,
    last_result: Option<String>,
    image_fingerprint: Option<[u8; 32]>,
    analysis_done: bool,
}

impl Session {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            thread_id: ThreadId::new(),
            history: ChatHistory::new(),
            last_result: None,
            image_fingerprint: None,
            analysis_done: false,
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn last_result(&self) -> Option<&str> {
        self.last_result.as_deref()
    }

    pub fn analysis_done(&self) -> bool {
        self.analysis_done
    }

    /// Analyse an image. Resubmitting the current image returns the
    /// existing analysis without calling the pipeline. A failed analysis
    /// leaves the session as it was.
    pub async fn submit_image(&mut self, bytes: Vec<u8>, mime_type: &str) -> Result<String> {
        let fingerprint: [u8; 32] = Sha256::digest(&bytes).into();
        if self.image_fingerprint == Some(fingerprint) {
            tracing::debug!(thread = %self.thread_id, "same image resubmitted");
            let stored = self.pipeline.store().get(&self.thread_id).await;
            let analysis = stored.and_then(|state| state.analysis_result);
            return Ok(or_placeholder(analysis.as_deref(), NO_RESULT_PLACEHOLDER));
        }

        let invocation = self
            .pipeline
            .invoke(&self.thread_id, PipelineInput::image(bytes, mime_type))
            .await?;

        let analysis = invocation.state.analysis_result;
        let shown = or_placeholder(analysis.as_deref(), NO_RESULT_PLACEHOLDER);

        self.image_fingerprint = Some(fingerprint);
        self.analysis_done = true;
        self.last_result = analysis;
        self.history.clear();
        self.history.push(ChatRole::SystemLabel, ANALYSIS_LABEL);
        self.history.push(ChatRole::AssistantAnswer, shown.clone());
        Ok(shown)
    }

    /// Ask a follow-up about the last result
    pub async fn ask(&mut self, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::unsupported("question is empty"));
        }

        let mut input = PipelineInput::question(question);
        input.prior_result = self.last_result.clone();
        let invocation = self.pipeline.invoke(&self.thread_id, input).await?;

        let answer = invocation.state.follow_up_answer;
        let shown = or_placeholder(answer.as_deref(), NO_RESPONSE_PLACEHOLDER);

        self.last_result = answer;
        self.history.push(ChatRole::UserQuestion, question);
        self.history.push(ChatRole::AssistantAnswer, shown.clone());
        Ok(shown)
    }

    /// Start over on a fresh thread, forgetting the old one
    pub fn reset(&mut self) {
        let old = std::mem::replace(&mut self.thread_id, ThreadId::new());
        self.pipeline.store().remove(&old);
        self.history.clear();
        self.last_result = None;
        self.image_fingerprint = None;
        self.analysis_done = false;
        tracing::debug!(old = %old, new = %self.thread_id, "session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::{PipelineConfig, Services};
    use crate::store::StateStore;
    use crate::tools::{NutritionOutcome, NutritionSource};
    use async_trait::async_trait;
    use nibble_agent::testing::{ScriptedReply, ScriptedTransport, text_reply};

    struct NoNutrition;

    #[async_trait]
    impl NutritionSource for NoNutrition {
        async fn lookup(&self, _query: &str) -> NutritionOutcome {
            NutritionOutcome::Failed {
                status: None,
                message: "offline".into(),
            }
        }
    }

    fn session(replies: Vec<ScriptedReply>) -> (Session, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(replies));
        let services = Services {
            transport: transport.clone(),
            model: nibble_ai::models::default_model(),
            nutrition: Arc::new(NoNutrition),
            encyclopedia: None,
        };
        let pipeline = Pipeline::new(
            services,
            PipelineConfig::default(),
            Arc::new(StateStore::new()),
        );
        (Session::new(Arc::new(pipeline)), transport)
    }

    const JPEG: &[u8] = &[0xff, 0xd8, 0xff, 0xe0, 0x00];

    #[tokio::test]
    async fn test_image_then_follow_up() {
        let (mut s, transport) = session(vec![
            text_reply("Food Items:\n- apple (1, medium)"),
            text_reply("- Apple: 95 kcal\nTotal: 95 kcal"),
            text_reply("- Apple: 95 kcal\n- Banana: 105 kcal\nTotal: 200 kcal"),
            text_reply("Roughly 1.8 g protein."),
        ]);

        let analysis = s.submit_image(JPEG.to_vec(), "image/jpeg").await.unwrap();
        assert!(analysis.contains("Total: 95"));
        assert!(s.analysis_done());

        let answer = s.ask("You missed a banana").await.unwrap();
        assert!(answer.contains("200"));
        assert_eq!(s.last_result(), Some(answer.as_str()));

        // the second follow-up is asked against the updated answer
        s.ask("protein?").await.unwrap();
        let request = transport.runs().last().unwrap().messages[0].text();
        assert!(request.contains("Banana: 105 kcal"));

        let roles: Vec<ChatRole> = s.history().iter().map(|e| e.role).collect();
        assert_eq!(
            roles,
            vec![
                ChatRole::SystemLabel,
                ChatRole::AssistantAnswer,
                ChatRole::UserQuestion,
                ChatRole::AssistantAnswer,
                ChatRole::UserQuestion,
                ChatRole::AssistantAnswer,
            ]
        );
        assert_eq!(s.history().entries()[0].text, ANALYSIS_LABEL);
    }

    #[tokio::test]
    async fn test_same_image_is_not_reanalysed() {
        let (mut s, transport) = session(vec![text_reply("items"), text_reply("analysis")]);

        s.submit_image(JPEG.to_vec(), "image/jpeg").await.unwrap();
        s.ask("q").await.unwrap();
        let runs_before = transport.run_count();
        let history_before = s.history().len();

        let again = s.submit_image(JPEG.to_vec(), "image/jpeg").await.unwrap();

        assert_eq!(transport.run_count(), runs_before);
        assert_eq!(s.history().len(), history_before);
        // the analysis, not the follow-up answer from the default reply
        assert_eq!(again, "analysis");
        assert_eq!(s.last_result(), Some("done"));
    }

    #[tokio::test]
    async fn test_new_image_clears_history() {
        let (mut s, _) = session(vec![
            text_reply("items"),
            text_reply("first analysis"),
            text_reply("answer"),
            text_reply("items 2"),
            text_reply("second analysis"),
        ]);

        s.submit_image(JPEG.to_vec(), "image/jpeg").await.unwrap();
        s.ask("q").await.unwrap();
        let shown = s.submit_image(vec![0x89, 0x50, 0x4e, 0x47], "image/png").await.unwrap();

        assert_eq!(shown, "second analysis");
        assert_eq!(s.history().len(), 2);
        assert_eq!(s.last_result(), Some("second analysis"));
    }

    #[tokio::test]
    async fn test_empty_analysis_shows_placeholder() {
        let (mut s, _) = session(vec![text_reply("items"), text_reply("  ")]);
        let shown = s.submit_image(JPEG.to_vec(), "image/jpeg").await.unwrap();
        assert_eq!(shown, NO_RESULT_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_ask_before_analysis_gets_sentinel() {
        let (mut s, transport) = session(vec![]);
        let answer = s.ask("how many calories").await.unwrap();
        assert_eq!(answer, "No result yet.");
        assert_eq!(transport.run_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_question_is_rejected() {
        let (mut s, _) = session(vec![]);
        let err = s.ask("   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedInput);
        assert!(s.history().is_empty());
    }

    #[tokio::test]
    async fn test_reset_starts_fresh_thread() {
        let (mut s, _) = session(vec![text_reply("items"), text_reply("analysis")]);
        s.submit_image(JPEG.to_vec(), "image/jpeg").await.unwrap();
        let old = s.thread_id();

        s.reset();

        assert_ne!(s.thread_id(), old);
        assert!(s.history().is_empty());
        assert!(s.last_result().is_none());
        assert!(!s.analysis_done());
        assert!(s.pipeline.store().get(&old).await.is_none());

        let answer = s.ask("calories?").await.unwrap();
        assert_eq!(answer, "No result yet.");
    }

    #[tokio::test]
    async fn test_failed_analysis_can_be_retried() {
        let (mut s, _) = session(vec![
            ScriptedReply::Fail("HTTP 503: unavailable".into()),
            text_reply("items"),
            text_reply("analysis"),
        ]);

        let err = s.submit_image(JPEG.to_vec(), "image/jpeg").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert!(!s.analysis_done());

        let shown = s.submit_image(JPEG.to_vec(), "image/jpeg").await.unwrap();
        assert_eq!(shown, "analysis");
    }

    #[tokio::test]
    async fn test_failed_second_image_keeps_session_intact() {
        let (mut s, transport) = session(vec![
            text_reply("items"),
            text_reply("APPLE ANALYSIS"),
            ScriptedReply::Fail("HTTP 503: unavailable".into()),
            text_reply("0.5 g protein"),
        ]);
        s.submit_image(JPEG.to_vec(), "image/jpeg").await.unwrap();
        let history_before = s.history().len();

        let err = s
            .submit_image(vec![0x89, 0x50, 0x4e, 0x47], "image/png")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);

        assert_eq!(s.history().len(), history_before);
        assert_eq!(s.history().entries()[1].text, "APPLE ANALYSIS");
        assert_eq!(s.last_result(), Some("APPLE ANALYSIS"));
        assert!(s.analysis_done());

        s.ask("protein?").await.unwrap();
        assert_eq!(s.history().len(), history_before + 2);
        let request = transport.runs().last().unwrap().messages[0].text();
        assert!(request.contains("APPLE ANALYSIS"));
    }

    #[tokio::test]
    async fn test_empty_analysis_is_not_follow_up_context() {
        let (mut s, transport) = session(vec![text_reply("items"), text_reply("")]);
        s.submit_image(JPEG.to_vec(), "image/jpeg").await.unwrap();
        assert_eq!(s.last_result(), Some(""));
        let runs_before = transport.run_count();

        let answer = s.ask("how many calories?").await.unwrap();

        assert_eq!(answer, "No result yet.");
        assert_eq!(transport.run_count(), runs_before);
    }
}
