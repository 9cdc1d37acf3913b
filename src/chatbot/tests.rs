//! Engine tests: whole message flows against an in-memory database and a
//! scripted model.
//!
//! Run with: cargo test chatbot

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use super::*;
use crate::chatbot::openai::{ChatRequest, ModelError};
use crate::chatbot::tokens::{CharEstimate, TokenCounter};

const PRIVATE_CHAT: i64 = 7;
const GROUP_CHAT: i64 = -100;
const ALICE: i64 = 7;
const BOB: i64 = 8;
const ADMIN: i64 = 99;
const BOT: &str = "testbot";

#[derive(Default)]
struct FakeModel {
    answers: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ChatRequest>>,
    moderated: Mutex<Vec<String>>,
    /// What every voice note transcribes to; `None` fails the call.
    transcript: Option<String>,
    transcribed: Mutex<Vec<(Vec<u8>, String)>>,
    flag_everything: bool,
    moderation_down: bool,
    completion_down: bool,
}

impl FakeModel {
    fn answering(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn transcribing(transcript: &str) -> Self {
        Self {
            transcript: Some(transcript.to_string()),
            ..Default::default()
        }
    }
}

impl ChatModel for FakeModel {
    async fn complete(&self, request: ChatRequest) -> Result<String, ModelError> {
        self.requests.lock().unwrap().push(request);
        if self.completion_down {
            return Err(ModelError::Api("503 Service Unavailable".into()));
        }
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| r#"{"message":"ok"}"#.to_string()))
    }

    async fn moderate(&self, text: &str) -> Result<bool, ModelError> {
        self.moderated.lock().unwrap().push(text.to_string());
        if self.moderation_down {
            return Err(ModelError::Http("connection refused".into()));
        }
        Ok(self.flag_everything)
    }

    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, ModelError> {
        self.transcribed.lock().unwrap().push((audio, file_name.to_string()));
        self.transcript
            .clone()
            .ok_or_else(|| ModelError::Api("400 Bad Request: unsupported audio".into()))
    }
}

fn engine_with(model: FakeModel, budget: usize) -> ChatbotEngine<FakeModel> {
    let config = ChatbotConfig {
        bot_username: BOT.to_string(),
        allowed_chat_ids: HashSet::from([PRIVATE_CHAT, GROUP_CHAT]),
        bot_admins: HashSet::from([ADMIN]),
        max_output_tokens: 1024,
        moderation: true,
    };
    let database = Arc::new(Database::in_memory().unwrap());
    let history = HistoryManager::new(TokenBudget::new(budget).unwrap(), CharEstimate);
    ChatbotEngine::new(config, database, history, model)
}

fn engine(model: FakeModel) -> ChatbotEngine<FakeModel> {
    engine_with(model, 128_000)
}

fn private(text: &str) -> IncomingMessage {
    IncomingMessage {
        message_id: 1,
        chat_id: PRIVATE_CHAT,
        user_id: ALICE,
        username: "alice".to_string(),
        is_private: true,
        text: text.to_string(),
        ..Default::default()
    }
}

fn group(user_id: i64, text: &str) -> IncomingMessage {
    IncomingMessage {
        message_id: 2,
        chat_id: GROUP_CHAT,
        user_id,
        username: format!("user{user_id}"),
        is_private: false,
        text: text.to_string(),
        ..Default::default()
    }
}

fn with_voice(mut msg: IncomingMessage) -> IncomingMessage {
    msg.voice = Some(Media {
        bytes: b"OggS voice".to_vec(),
        content_type: "audio/ogg".to_string(),
    });
    msg
}

/// The `message` field of the JSON the model received for the last user turn.
fn sent_message(engine: &ChatbotEngine<FakeModel>) -> String {
    let requests = engine.model().requests();
    let turn = requests.last().and_then(|r| r.turns.last()).unwrap();
    let input: serde_json::Value = serde_json::from_str(&turn.plain_text()).unwrap();
    input["message"].as_str().unwrap().to_string()
}

fn reply_to_bot(mut msg: IncomingMessage) -> IncomingMessage {
    msg.reply_to = Some(ReplyTo {
        message_id: 1,
        text: "earlier answer".to_string(),
        from_bot_itself: true,
        ..Default::default()
    });
    msg
}

async fn text_reply(engine: &ChatbotEngine<FakeModel>, msg: IncomingMessage) -> String {
    match engine.handle_message(&msg).await.unwrap() {
        Some(Reply::Text(text)) => text,
        other => panic!("expected text reply, got {other:?}"),
    }
}

async fn answer(engine: &ChatbotEngine<FakeModel>, msg: IncomingMessage) -> (String, Vec<String>) {
    match engine.handle_message(&msg).await.unwrap() {
        Some(Reply::Answer { html, followup }) => (html, followup),
        other => panic!("expected answer, got {other:?}"),
    }
}

fn stored(engine: &ChatbotEngine<FakeModel>, chat_id: i64) -> ChatSettings {
    engine.database().chat_settings(chat_id).unwrap()
}

// =============================================================================
// ACCESS CONTROL
// =============================================================================

mod access {
    use super::*;

    #[tokio::test]
    async fn test_unallowed_chat_gets_greeting() {
        let engine = engine(FakeModel::default());
        let mut msg = private("hello");
        msg.chat_id = 12345;

        let text = text_reply(&engine, msg).await;
        assert!(text.contains("not allowed to work in this chat"));
        assert!(engine.model().requests().is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_is_ignored() {
        let engine = engine(FakeModel::default());
        assert_eq!(engine.handle_message(&private("   ")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_block_requires_admin() {
        let engine = engine(FakeModel::default());
        let text = text_reply(&engine, group(ALICE, "/block 8")).await;
        assert_eq!(text, "You are not allowed to use this command.");
        assert!(!engine.database().is_denied(BOB).unwrap());
    }

    #[tokio::test]
    async fn test_admin_blocks_and_unblocks() {
        let engine = engine(FakeModel::default());

        let text = text_reply(&engine, group(ADMIN, "/block 8, 9 nope")).await;
        assert_eq!(text, "Users added to deny list.");
        assert_eq!(engine.database().deny_list().unwrap(), vec![8, 9]);

        let text = text_reply(&engine, group(BOB, "/start")).await;
        assert_eq!(text, "You have been blocked from using this bot.");

        let text = text_reply(&engine, group(ADMIN, "/unblock@testbot 8")).await;
        assert_eq!(text, "User removed from deny list.");
        assert_eq!(engine.database().deny_list().unwrap(), vec![9]);

        let text = text_reply(&engine, group(BOB, "/start")).await;
        assert!(text.starts_with("Welcome!"));
    }

    #[tokio::test]
    async fn test_admin_on_deny_list_is_not_blocked() {
        let engine = engine(FakeModel::default());
        engine.database().deny(&[ADMIN]).unwrap();

        let mut msg = private("/start");
        msg.user_id = ADMIN;
        assert!(text_reply(&engine, msg).await.starts_with("Welcome!"));
    }

    #[tokio::test]
    async fn test_blocked_user_chat_request() {
        let engine = engine(FakeModel::default());
        engine.database().deny(&[ALICE]).unwrap();

        let text = text_reply(&engine, private("hi there")).await;
        assert_eq!(text, "You have been blocked from using this bot.");
        assert!(engine.model().requests().is_empty());
    }

    #[tokio::test]
    async fn test_blocked_user_plain_group_chatter_is_ignored() {
        let engine = engine(FakeModel::default());
        engine.database().deny(&[BOB]).unwrap();
        assert_eq!(engine.handle_message(&group(BOB, "just talking")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_command_for_other_bot_is_ignored_in_group() {
        let engine = engine(FakeModel::default());
        assert_eq!(
            engine.handle_message(&group(ALICE, "/start@otherbot")).await.unwrap(),
            None
        );
    }
}

// =============================================================================
// CHAT FLOW
// =============================================================================

mod chat {
    use super::*;

    #[tokio::test]
    async fn test_private_message_is_answered() {
        let engine = engine(FakeModel::answering(&[r#"{"message":"<b>Hi</b> alice"}"#]));

        let (html, followup) = answer(&engine, private("hello")).await;
        assert_eq!(html, "<b>Hi</b> alice");
        assert!(followup.is_empty());

        let requests = engine.model().requests();
        assert_eq!(requests.len(), 1);
        let turns = &requests[0].turns;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::System);
        assert!(turns[0].plain_text().contains("You are an helpful assistant."));
        assert_eq!(turns[1].role, Role::User);
        assert!(turns[1].plain_text().contains(r#""message":"hello""#));
        assert_eq!(requests[0].user.as_deref(), Some("7"));
        assert_eq!(requests[0].max_output_tokens, 1024);
    }

    #[tokio::test]
    async fn test_unparseable_answer_is_sent_as_is() {
        let engine = engine(FakeModel::answering(&["plain words"]));
        let (html, _) = answer(&engine, private("hello")).await;
        assert_eq!(html, "plain words");
    }

    #[tokio::test]
    async fn test_history_disabled_stores_nothing_and_drops_followups() {
        let engine = engine(FakeModel::answering(&[r#"{"message":"a","followup":["more?"]}"#]));

        let (_, followup) = answer(&engine, private("hello")).await;
        assert!(followup.is_empty());
        assert!(stored(&engine, PRIVATE_CHAT).history.is_empty());
    }

    #[tokio::test]
    async fn test_history_enabled_stores_exchange() {
        let raw = r#"{"message":"a","followup":["Tell me more","Why?"]}"#;
        let engine = engine(FakeModel::answering(&[raw, r#"{"message":"b"}"#]));
        text_reply(&engine, private("/enablehistory")).await;

        let (_, followup) = answer(&engine, private("first")).await;
        assert_eq!(followup, vec!["Tell me more", "Why?"]);

        let history = stored(&engine, PRIVATE_CHAT).history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1], ConversationTurn::assistant(raw));

        answer(&engine, private("second")).await;
        let requests = engine.model().requests();
        // system + first user + first assistant + second user
        assert_eq!(requests[1].turns.len(), 4);
        assert!(requests[1].turns[0].plain_text().contains("followup"));
        assert_eq!(stored(&engine, PRIVATE_CHAT).history.len(), 4);
    }

    #[tokio::test]
    async fn test_group_plain_message_is_ignored() {
        let engine = engine(FakeModel::default());
        assert_eq!(engine.handle_message(&group(ALICE, "hello all")).await.unwrap(), None);
        assert!(engine.model().requests().is_empty());
    }

    #[tokio::test]
    async fn test_group_reply_to_bot_is_answered() {
        let engine = engine(FakeModel::answering(&[r#"{"message":"sure"}"#]));
        let (html, _) = answer(&engine, reply_to_bot(group(ALICE, "and then?"))).await;
        assert_eq!(html, "sure");

        // The bot's own message is already in history, so it isn't quoted.
        let user_turn = &engine.model().requests()[0].turns[1];
        assert!(!user_turn.plain_text().contains("earlier answer"));
    }

    #[tokio::test]
    async fn test_group_chat_command_prefixes_followups() {
        let engine = engine(FakeModel::answering(&[r#"{"message":"x","followup":["Go on"]}"#]));
        text_reply(&engine, group(ALICE, "/enablehistory")).await;

        let (_, followup) = answer(&engine, group(ALICE, "/chat@testbot what is rust?")).await;
        assert_eq!(followup, vec!["/chat@testbot Go on"]);

        let user_turn = &engine.model().requests()[0].turns[1];
        assert!(user_turn.plain_text().contains("what is rust?"));
        assert!(!user_turn.plain_text().contains("/chat"));
    }

    #[tokio::test]
    async fn test_image_only_message_is_answered() {
        let engine = engine(FakeModel::default());
        let mut msg = private("");
        msg.images.push(Media {
            bytes: vec![0xff, 0xd8],
            content_type: "image/jpeg".to_string(),
        });

        answer(&engine, msg).await;
        let user_turn = &engine.model().requests()[0].turns[1];
        assert_eq!(user_turn.media_count(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_is_an_error() {
        let engine = engine(FakeModel {
            completion_down: true,
            ..Default::default()
        });
        text_reply(&engine, private("/enablehistory")).await;

        let err = engine.handle_message(&private("hello")).await.unwrap_err();
        assert!(matches!(err, EngineError::Model(ModelError::Api(_))));
        assert!(stored(&engine, PRIVATE_CHAT).history.is_empty());
    }

    #[tokio::test]
    async fn test_context_is_used_in_system_prompt() {
        let engine = engine(FakeModel::default());

        let text = text_reply(&engine, private("/context You are a pirate")).await;
        assert_eq!(text, r#"Context set to "You are a pirate""#);
        let text = text_reply(&engine, private("/context")).await;
        assert_eq!(text, r#"Current context is "You are a pirate""#);

        answer(&engine, private("ahoy")).await;
        let system = engine.model().requests()[0].turns[0].plain_text();
        assert!(system.ends_with(r#""""You are a pirate""""#));
        assert!(!system.contains("followup"));
    }

    #[tokio::test]
    async fn test_no_context_set() {
        let engine = engine(FakeModel::default());
        let text = text_reply(&engine, private("/context")).await;
        assert!(text.starts_with("No context currently set."));
    }
}

// =============================================================================
// TOKEN BUDGET
// =============================================================================

mod budget {
    use super::*;

    #[tokio::test]
    async fn test_stored_history_stays_within_budget() {
        let settings = ChatSettings {
            history_enabled: true,
            ..Default::default()
        };
        let prompt_tokens = CharEstimate.count_tokens(&system_prompt(&settings));
        // Room for roughly two turns next to the system prompt.
        let ceiling = (prompt_tokens + 120) * 100 / 90 + 1;

        let long_answer = format!(r#"{{"message":"{}"}}"#, "a".repeat(200));
        let engine = engine_with(
            FakeModel::answering(&[long_answer.as_str(); 3]),
            ceiling,
        );
        let check = HistoryManager::new(TokenBudget::new(ceiling).unwrap(), CharEstimate);
        text_reply(&engine, private("/enablehistory")).await;

        for i in 0..3 {
            answer(&engine, private(&format!("question {i} {}", "q".repeat(200)))).await;

            let history = stored(&engine, PRIVATE_CHAT).history;
            assert!(check.history_tokens(&system_prompt(&settings), &history) <= check.budget().limit());
            assert_eq!(history.last(), Some(&ConversationTurn::assistant(long_answer.clone())));
        }

        // Older exchanges were evicted, oldest first.
        let history = stored(&engine, PRIVATE_CHAT).history;
        assert!(history.len() < 6);
        for request in engine.model().requests() {
            let sent: Vec<_> = request.turns[1..].to_vec();
            assert!(check.history_tokens(&system_prompt(&settings), &sent) <= check.budget().limit());
        }
    }

    #[tokio::test]
    async fn test_tiny_budget_keeps_latest_turn() {
        let engine = engine_with(FakeModel::default(), 10);
        text_reply(&engine, private("/enablehistory")).await;

        answer(&engine, private("hello")).await;
        let request = &engine.model().requests()[0];
        assert_eq!(request.turns.len(), 2, "the new user turn is always sent");

        let history = stored(&engine, PRIVATE_CHAT).history;
        assert_eq!(history, vec![ConversationTurn::assistant(r#"{"message":"ok"}"#)]);
    }
}

// =============================================================================
// MODERATION
// =============================================================================

mod moderation {
    use super::*;

    #[tokio::test]
    async fn test_flagged_user_is_denied() {
        let engine = engine(FakeModel {
            flag_everything: true,
            ..Default::default()
        });

        let text = text_reply(&engine, private("something nasty")).await;
        assert!(text.starts_with("Your message is inappropriate."));
        assert!(engine.database().is_denied(ALICE).unwrap());
        assert!(engine.model().requests().is_empty());

        let text = text_reply(&engine, private("sorry")).await;
        assert_eq!(text, "You have been blocked from using this bot.");
    }

    #[tokio::test]
    async fn test_moderation_outage_lets_message_through() {
        let engine = engine(FakeModel {
            moderation_down: true,
            ..Default::default()
        });
        answer(&engine, private("hello")).await;
        assert_eq!(engine.model().requests().len(), 1);
    }
}

// =============================================================================
// VOICE MESSAGES
// =============================================================================

mod voice {
    use super::*;

    #[tokio::test]
    async fn test_voice_note_is_transcribed_and_wrapped() {
        let engine = engine(FakeModel::transcribing("what time is it in Rome?"));

        answer(&engine, with_voice(private(""))).await;

        let transcribed = engine.model().transcribed.lock().unwrap().clone();
        assert_eq!(transcribed, vec![(b"OggS voice".to_vec(), "voice.ogg".to_string())]);
        assert_eq!(
            sent_message(&engine),
            r#"The user sent an audio. The transcription is provided here in triple quotes: """what time is it in Rome?""""#
        );
    }

    #[tokio::test]
    async fn test_voice_caption_becomes_prompt() {
        let engine = engine(FakeModel::transcribing("ciao a tutti"));

        answer(&engine, with_voice(private("translate to English"))).await;

        let message = sent_message(&engine);
        assert!(message.contains(r#""""ciao a tutti""""#));
        assert!(message.ends_with(
            r#"The user also provided the following prompt together with the audio, reported in the following triple quotes: """translate to English""""#
        ));
    }

    #[tokio::test]
    async fn test_transcription_is_moderated() {
        let engine = engine(FakeModel {
            transcript: Some("something nasty".to_string()),
            flag_everything: true,
            ..Default::default()
        });

        let text = text_reply(&engine, with_voice(private(""))).await;
        assert!(text.starts_with("Your message is inappropriate."));
        let moderated = engine.model().moderated.lock().unwrap().clone();
        assert_eq!(moderated.len(), 1);
        assert!(moderated[0].contains("something nasty"));
        assert!(engine.model().requests().is_empty());
    }

    #[tokio::test]
    async fn test_group_voice_needs_reply_to_bot() {
        let engine = engine(FakeModel::transcribing("hello bot"));

        assert_eq!(engine.handle_message(&with_voice(group(ALICE, ""))).await.unwrap(), None);
        assert!(engine.model().transcribed.lock().unwrap().is_empty());

        answer(&engine, with_voice(reply_to_bot(group(ALICE, "")))).await;
        assert!(sent_message(&engine).contains(r#""""hello bot""""#));
    }

    #[tokio::test]
    async fn test_failed_transcription_is_an_error() {
        let engine = engine(FakeModel::default());

        let result = engine.handle_message(&with_voice(private(""))).await;
        assert!(matches!(result, Err(EngineError::Model(ModelError::Api(_)))));
        assert!(engine.model().requests().is_empty());
    }
}

// =============================================================================
// HISTORY COMMANDS
// =============================================================================

mod history_commands {
    use super::*;

    #[tokio::test]
    async fn test_enable_disable() {
        let engine = engine(FakeModel::default());

        assert_eq!(text_reply(&engine, private("/enablehistory")).await, "History enabled.");
        assert_eq!(
            text_reply(&engine, private("/enablehistory")).await,
            "History already enabled for this chat."
        );

        answer(&engine, private("hello")).await;
        assert_eq!(stored(&engine, PRIVATE_CHAT).history.len(), 2);

        assert_eq!(text_reply(&engine, private("/disablehistory")).await, "History disabled.");
        let settings = stored(&engine, PRIVATE_CHAT);
        assert!(!settings.history_enabled);
        assert!(settings.history.is_empty());
        assert_eq!(
            text_reply(&engine, private("/disablehistory")).await,
            "History already disabled for this chat."
        );
    }

    #[tokio::test]
    async fn test_clear() {
        let engine = engine(FakeModel::default());
        assert_eq!(
            text_reply(&engine, private("/clearhistory")).await,
            "History is disabled for this chat."
        );

        text_reply(&engine, private("/enablehistory")).await;
        answer(&engine, private("hello")).await;
        assert_eq!(text_reply(&engine, private("/clearhistory")).await, "History cleared.");
        let settings = stored(&engine, PRIVATE_CHAT);
        assert!(settings.history_enabled);
        assert!(settings.history.is_empty());
    }

    #[tokio::test]
    async fn test_export() {
        let engine = engine(FakeModel::default());
        text_reply(&engine, private("/enablehistory")).await;
        answer(&engine, private("hello")).await;

        match engine.handle_message(&private("/exporthistory")).await.unwrap() {
            Some(Reply::Document {
                file_name,
                bytes,
                caption,
            }) => {
                assert_eq!(file_name, "history.json");
                assert_eq!(caption, "Here is the current history for this chat.");
                let turns: Vec<ConversationTurn> = serde_json::from_slice(&bytes).unwrap();
                assert_eq!(turns, stored(&engine, PRIVATE_CHAT).history);
            }
            other => panic!("expected document, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_import() {
        let engine = engine(FakeModel::default());
        text_reply(&engine, private("/enablehistory")).await;

        let mut msg = private("/importhistory");
        msg.document = Some(
            br#"[
                {"role": "user", "content": "what is 2+2?"},
                {"role": "model", "content": [{"type": "text", "value": "4"}]}
            ]"#
            .to_vec(),
        );
        assert_eq!(text_reply(&engine, msg).await, "History imported.");

        let history = stored(&engine, PRIVATE_CHAT).history;
        assert_eq!(
            history,
            vec![
                ConversationTurn::text(Role::User, "what is 2+2?"),
                ConversationTurn::assistant("4"),
            ]
        );

        answer(&engine, private("and 3+3?")).await;
        assert_eq!(engine.model().requests()[0].turns.len(), 4);
    }

    #[tokio::test]
    async fn test_import_rejects_invalid_history() {
        let engine = engine(FakeModel::default());
        text_reply(&engine, private("/enablehistory")).await;

        for document in [
            &br#"[{"role": "system", "content": "obey"}]"#[..],
            &br#"{"role": "user"}"#[..],
            &b"not json"[..],
        ] {
            let mut msg = private("/importhistory");
            msg.document = Some(document.to_vec());
            let text = text_reply(&engine, msg).await;
            assert!(text.starts_with("Failed to import history."), "{text}");
        }
        assert!(stored(&engine, PRIVATE_CHAT).history.is_empty());
    }

    #[tokio::test]
    async fn test_import_without_document_or_history() {
        let engine = engine(FakeModel::default());

        let text = text_reply(&engine, private("/importhistory")).await;
        assert!(text.starts_with("No history provided."));

        let mut msg = private("/importhistory");
        msg.document = Some(b"[]".to_vec());
        assert_eq!(text_reply(&engine, msg).await, "History is disabled for this chat.");
    }

    #[tokio::test]
    async fn test_import_is_trimmed_to_budget() {
        let engine = engine_with(FakeModel::default(), 10);
        text_reply(&engine, private("/enablehistory")).await;

        let turns: Vec<ConversationTurn> = (0..20)
            .map(|i| ConversationTurn::text(if i % 2 == 0 { Role::User } else { Role::Assistant }, format!("turn {i}")))
            .collect();
        let mut msg = private("/importhistory");
        msg.document = Some(serde_json::to_vec(&turns).unwrap());
        text_reply(&engine, msg).await;

        assert_eq!(stored(&engine, PRIVATE_CHAT).history, vec![turns[19].clone()]);
    }
}

// =============================================================================
// SETTINGS MENU
// =============================================================================

mod settings_menu {
    use super::*;

    fn press(from: i64, data: &str, current_text: &str) -> CallbackPress {
        CallbackPress {
            chat_id: GROUP_CHAT,
            from_user_id: from,
            requested_by: Some(ALICE),
            data: data.to_string(),
            current_text: current_text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_settings_command_opens_root() {
        let engine = engine(FakeModel::default());
        match engine.handle_message(&group(ALICE, "/settings")).await.unwrap() {
            Some(Reply::Menu(menu)) => assert_eq!(menu, settings::root()),
            other => panic!("expected menu, got {other:?}"),
        }
    }

    #[test]
    fn test_press_from_other_user_is_ignored() {
        let engine = engine(FakeModel::default());
        let result = engine.handle_callback(&press(BOB, "history:toggle", "")).unwrap();
        assert_eq!(result, None);
        assert!(!stored(&engine, GROUP_CHAT).history_enabled);
    }

    #[test]
    fn test_toggle_saves_and_renders() {
        let engine = engine(FakeModel::default());
        let menu = engine
            .handle_callback(&press(ALICE, "history:toggle", "History is currently disabled."))
            .unwrap()
            .unwrap();
        assert!(menu.text.contains("<b>enabled</b>"));
        assert!(stored(&engine, GROUP_CHAT).history_enabled);
    }

    #[test]
    fn test_unchanged_page_is_not_reedited() {
        let engine = engine(FakeModel::default());
        assert_eq!(engine.handle_callback(&press(ALICE, "settings", "Bot settings")).unwrap(), None);

        let menu = engine.handle_callback(&press(ALICE, "history", "Bot settings")).unwrap();
        assert!(menu.is_some());
    }

    #[test]
    fn test_clearing_empty_history_does_not_reedit() {
        let engine = engine(FakeModel::default());
        engine
            .handle_callback(&press(ALICE, "history:toggle", "History is currently disabled."))
            .unwrap();

        let shown = "History is currently enabled and contains 0 messages.";
        assert_eq!(engine.handle_callback(&press(ALICE, "history:clear", shown)).unwrap(), None);
        let settings = stored(&engine, GROUP_CHAT);
        assert!(settings.history_enabled);
        assert!(settings.history.is_empty());

        // Clearing a non-empty history still changes the page.
        let mut with_turns = settings;
        with_turns.history = vec![ConversationTurn::assistant("hi")];
        engine.database().save_chat_settings(GROUP_CHAT, &with_turns).unwrap();
        let shown = "History is currently enabled and contains 1 messages.";
        let menu = engine.handle_callback(&press(ALICE, "history:clear", shown)).unwrap().unwrap();
        assert!(menu.text.contains("<b>0</b>"));
    }

    #[test]
    fn test_unknown_callback() {
        let engine = engine(FakeModel::default());
        assert_eq!(engine.handle_callback(&press(ALICE, "bogus", "")).unwrap(), None);
    }
}
