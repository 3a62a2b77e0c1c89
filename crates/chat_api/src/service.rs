use crate::{CommandGrammar, CommandKind};
use common::domain::{
    DeviceDirectory, DeviceRecord, DirectoryIdentity, DomainError, DomainResult, Envelope,
    MacAddress, CMD_GET_STATE, OPT_CALLBACK_MODULE, OPT_CORRELATION_ID, OPT_NICK, OPT_ROOM,
};
use common::mqtt::{BusPublisher, TopicScheme};
use rand::Rng;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Module identifier for recipient addressing on the callback topic.
pub const MODULE_NAME: &str = "chat_api";

struct PendingQuery {
    room: String,
}

/// Turns chat messages into typed commands and formats the replies.
///
/// Presence queries go through the request/response layer: the service
/// publishes a `get_state` request, answers the user with a placeholder
/// and finishes the conversation when the correlated callback arrives.
/// A request that never gets a callback simply leaves the placeholder
/// standing.
pub struct ChatService {
    directory: Arc<dyn DeviceDirectory>,
    publisher: Arc<dyn BusPublisher>,
    topics: TopicScheme,
    grammar: CommandGrammar,
    pending: HashMap<String, PendingQuery>,
}

impl ChatService {
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        publisher: Arc<dyn BusPublisher>,
        topics: TopicScheme,
    ) -> Self {
        let grammar = CommandGrammar::new(topics.zone());
        Self {
            directory,
            publisher,
            topics,
            grammar,
            pending: HashMap::new(),
        }
    }

    /// Process one inbound chat message. Messages that do not address the
    /// system produce no reply at all.
    #[instrument(skip(self, text), fields(topic = %topic))]
    pub async fn handle_chat_message(&mut self, topic: &str, text: &str) -> DomainResult<()> {
        if !self.grammar.is_zone_command(text) {
            return Ok(());
        }

        let Some(room) = self.grammar.room_from_topic(topic).map(str::to_string) else {
            debug!("chat message without a reply room, dropping");
            return Ok(());
        };
        let nick = self.grammar.nick_from_topic(topic).map(str::to_string);

        debug!(command_text = %text, "processing chat command");
        match self.grammar.classify(text) {
            CommandKind::Register => self.cmd_register(&room, nick.as_deref(), text).await,
            CommandKind::Deregister => self.cmd_deregister(&room, nick.as_deref(), text).await,
            CommandKind::Link => self.cmd_link(&room, nick.as_deref(), text).await,
            CommandKind::List => self.cmd_list(&room, nick.as_deref()).await,
            CommandKind::Presence => self.cmd_presence(&room, nick.as_deref()).await,
            CommandKind::Help => self.cmd_help(&room).await,
        }
    }

    /// Process an envelope from the callback topic. Replies for other
    /// modules, unknown correlation ids and malformed payloads are all
    /// "not our message".
    #[instrument(skip(self, envelope), fields(command = %envelope.command))]
    pub async fn handle_callback(&mut self, envelope: Envelope) -> DomainResult<()> {
        if !envelope.is_reply()
            || envelope.command != CMD_GET_STATE
            || !envelope.addressed_to(MODULE_NAME)
        {
            return Ok(());
        }
        let Some(correlation_id) = envelope.correlation_id() else {
            return Ok(());
        };
        let Some(query) = self.pending.remove(correlation_id) else {
            debug!(correlation_id, "callback for unknown request, ignoring");
            return Ok(());
        };

        let state: Vec<DeviceRecord> = envelope
            .response
            .as_ref()
            .and_then(|r| r.get("state"))
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| DomainError::MalformedEnvelope(e.to_string()))?
            .unwrap_or_default();

        let reply = self.format_presence(&state);
        self.reply(&query.room, &reply).await
    }

    async fn cmd_register(&self, room: &str, nick: Option<&str>, text: &str) -> DomainResult<()> {
        let Some(identity) = self.linked_identity(room, nick).await? else {
            return Ok(());
        };
        let Some(mac) = self.valid_mac(room, text).await? else {
            return Ok(());
        };

        self.directory.register_device(&identity.uid, &mac).await?;
        self.reply(room, &format!("Registered {mac} to {}", identity.display_name))
            .await
    }

    async fn cmd_deregister(&self, room: &str, nick: Option<&str>, text: &str) -> DomainResult<()> {
        let Some(identity) = self.linked_identity(room, nick).await? else {
            return Ok(());
        };
        let Some(mac) = self.valid_mac(room, text).await? else {
            return Ok(());
        };

        self.directory
            .deregister_device(&identity.uid, &mac)
            .await?;
        self.reply(
            room,
            &format!("Deregistered {mac} from {}", identity.display_name),
        )
        .await
    }

    async fn cmd_link(&self, room: &str, nick: Option<&str>, text: &str) -> DomainResult<()> {
        let Some(nick) = nick else {
            return self
                .reply(room, "I can't tell who you are from this channel.")
                .await;
        };
        let Some(uid) = self.grammar.link_argument(text) else {
            return self.reply(room, "Usage: macme link <uid>").await;
        };

        match self.directory.link_nick(uid, nick).await {
            Ok(()) => self.reply(room, &format!("Linked {nick} to {uid}")).await,
            Err(DomainError::IdentityNotFound(_)) => {
                self.reply(room, &format!("No such identity: {uid}")).await
            }
            Err(e) => Err(e),
        }
    }

    async fn cmd_list(&self, room: &str, nick: Option<&str>) -> DomainResult<()> {
        let Some(identity) = self.linked_identity(room, nick).await? else {
            return Ok(());
        };

        let devices = self.directory.devices_for(&identity.uid).await?;
        if devices.is_empty() {
            self.reply(room, "You have no devices registered").await
        } else {
            let listing = devices
                .iter()
                .map(MacAddress::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            self.reply(room, &format!("Your devices: {listing}")).await
        }
    }

    async fn cmd_presence(&mut self, room: &str, nick: Option<&str>) -> DomainResult<()> {
        let correlation_id = uuid::Uuid::new_v4().to_string();

        let mut options = Map::new();
        options.insert(OPT_CORRELATION_ID.into(), Value::from(correlation_id.clone()));
        options.insert(OPT_CALLBACK_MODULE.into(), Value::from(MODULE_NAME));
        options.insert(OPT_ROOM.into(), Value::from(room));
        if let Some(nick) = nick {
            options.insert(OPT_NICK.into(), Value::from(nick));
        }

        let request = Envelope::request(CMD_GET_STATE, options);
        let payload = serde_json::to_vec(&request)
            .map_err(|e| anyhow::anyhow!("encoding request envelope: {e}"))?;
        self.publisher
            .publish(&self.topics.command_topic(), payload, false)
            .await?;

        // A room has at most one query in flight; a new one supersedes
        // the unanswered one, so the map stays bounded by room count.
        self.pending.retain(|_, query| query.room != room);
        self.pending.insert(
            correlation_id,
            PendingQuery {
                room: room.to_string(),
            },
        );

        self.reply(room, "Let me see who's around...").await
    }

    async fn cmd_help(&self, room: &str) -> DomainResult<()> {
        let zone = self.topics.zone();
        let help = format!(
            "!{zone} me                     - View who's all in your zone ({zone})\n\
             !macme register <macAddress>   - Register your device to your user\n\
             !macme deregister <macAddress> - Deregister device from your user\n\
             !macme link <uid>              - Link your chat nick to your user\n\
             !macme list                    - View all devices registered to you"
        );
        self.reply(room, &help).await
    }

    /// Resolve the sender; unlinked senders get the "not linked" reply
    /// plus help, and the calling command is skipped.
    async fn linked_identity(
        &self,
        room: &str,
        nick: Option<&str>,
    ) -> DomainResult<Option<DirectoryIdentity>> {
        let identity = match nick {
            Some(nick) => self.directory.find_by_nick(nick).await?,
            None => None,
        };

        if identity.is_none() {
            warn!(nick = nick.unwrap_or("<unknown>"), "sender is not linked");
            self.reply(room, "You're not linked to a user yet.").await?;
            self.cmd_help(room).await?;
        }
        Ok(identity)
    }

    async fn valid_mac(&self, room: &str, text: &str) -> DomainResult<Option<MacAddress>> {
        match self.grammar.mac_argument(text) {
            Some(mac) => Ok(Some(mac)),
            None => {
                self.reply(room, "That's not a valid MAC address").await?;
                Ok(None)
            }
        }
    }

    fn format_presence(&self, state: &[DeviceRecord]) -> String {
        let mut names: Vec<&str> = Vec::new();
        for record in state {
            if let Some((_, display_name)) = record.owner() {
                if !names.contains(&display_name) {
                    names.push(display_name);
                }
            }
        }

        let mut rng = rand::thread_rng();
        let zone = self.topics.zone();
        if names.is_empty() {
            let phrases = [
                format!("Nobody is at {zone}. Be the first!"),
                "Looks like nobody is around".to_string(),
            ];
            phrases[rng.gen_range(0..phrases.len())].clone()
        } else {
            let phrases = [
                format!("The following folks are at {zone}"),
                "These peeps are around".to_string(),
                format!("These fine people are at {zone}"),
            ];
            format!(
                "{}: {}",
                phrases[rng.gen_range(0..phrases.len())],
                names.join(", ")
            )
        }
    }

    async fn reply(&self, room: &str, message: &str) -> DomainResult<()> {
        let topic = TopicScheme::chat_reply_topic(room);
        self.publisher
            .publish(&topic, message.as_bytes().to_vec(), false)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::domain::{Enrichment, MockDeviceDirectory};
    use common::mqtt::MockBusPublisher;
    use serde_json::json;

    const CHAT_TOPIC: &str = "irc/room/lounge/nick/jdoe/said";

    fn scheme() -> TopicScheme {
        TopicScheme::new("macme", "hq")
    }

    fn jdoe() -> DirectoryIdentity {
        DirectoryIdentity {
            uid: "jdoe".to_string(),
            display_name: "Jane Doe".to_string(),
        }
    }

    fn owned_record(mac: &str, display_name: &str) -> DeviceRecord {
        let mut record =
            DeviceRecord::observed(mac.parse().unwrap(), "10.255.0.2".to_string(), Utc::now());
        record.enrichment = Enrichment::Owner {
            uid: display_name.to_lowercase().replace(' ', ""),
            display_name: display_name.to_string(),
        };
        record
    }

    fn service(directory: MockDeviceDirectory, publisher: MockBusPublisher) -> ChatService {
        ChatService::new(Arc::new(directory), Arc::new(publisher), scheme())
    }

    fn expect_room_reply(
        publisher: &mut MockBusPublisher,
        expected: impl Fn(&str) -> bool + Send + 'static,
    ) {
        publisher
            .expect_publish()
            .withf(move |topic, payload, retain| {
                topic == "hubot/respond/room/lounge"
                    && !*retain
                    && expected(std::str::from_utf8(payload).unwrap())
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
    }

    #[tokio::test]
    async fn untriggered_messages_produce_no_reply() {
        let directory = MockDeviceDirectory::new();
        let mut publisher = MockBusPublisher::new();
        publisher.expect_publish().times(0);
        let mut svc = service(directory, publisher);

        svc.handle_chat_message(CHAT_TOPIC, "foo bar").await.unwrap();
    }

    #[tokio::test]
    async fn register_for_linked_user_hits_the_directory() {
        let mut directory = MockDeviceDirectory::new();
        directory
            .expect_find_by_nick()
            .withf(|nick| nick == "jdoe")
            .times(1)
            .returning(|_| Ok(Some(jdoe())));
        directory
            .expect_register_device()
            .withf(|uid, mac| uid == "jdoe" && mac.as_str() == "aa:bb:cc:dd:ee:ff")
            .times(1)
            .returning(|_, _| Ok(()));

        let mut publisher = MockBusPublisher::new();
        expect_room_reply(&mut publisher, |m| {
            m.contains("Registered aa:bb:cc:dd:ee:ff")
        });

        let mut svc = service(directory, publisher);
        svc.handle_chat_message(CHAT_TOPIC, "!macme register AA:BB:CC:DD:EE:FF")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unlinked_sender_gets_not_linked_and_help() {
        let mut directory = MockDeviceDirectory::new();
        directory
            .expect_find_by_nick()
            .times(1)
            .returning(|_| Ok(None));
        directory.expect_register_device().times(0);

        let mut publisher = MockBusPublisher::new();
        expect_room_reply(&mut publisher, |m| m.contains("not linked"));
        expect_room_reply(&mut publisher, |m| m.contains("!macme register"));

        let mut svc = service(directory, publisher);
        svc.handle_chat_message(CHAT_TOPIC, "!macme register AA:BB:CC:DD:EE:FF")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn malformed_mac_yields_user_error_not_mutation() {
        let mut directory = MockDeviceDirectory::new();
        directory
            .expect_find_by_nick()
            .times(1)
            .returning(|_| Ok(Some(jdoe())));
        directory.expect_register_device().times(0);

        let mut publisher = MockBusPublisher::new();
        expect_room_reply(&mut publisher, |m| m.contains("not a valid MAC"));

        let mut svc = service(directory, publisher);
        svc.handle_chat_message(CHAT_TOPIC, "!macme register ZZ:42")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn list_enumerates_registered_devices() {
        let mut directory = MockDeviceDirectory::new();
        directory
            .expect_find_by_nick()
            .times(1)
            .returning(|_| Ok(Some(jdoe())));
        directory
            .expect_devices_for()
            .withf(|uid| uid == "jdoe")
            .times(1)
            .returning(|_| Ok(vec!["aa:bb:cc:dd:ee:ff".parse().unwrap()]));

        let mut publisher = MockBusPublisher::new();
        expect_room_reply(&mut publisher, |m| m.contains("aa:bb:cc:dd:ee:ff"));

        let mut svc = service(directory, publisher);
        svc.handle_chat_message(CHAT_TOPIC, "!macme list").await.unwrap();
    }

    #[tokio::test]
    async fn empty_device_list_says_so() {
        let mut directory = MockDeviceDirectory::new();
        directory
            .expect_find_by_nick()
            .times(1)
            .returning(|_| Ok(Some(jdoe())));
        directory
            .expect_devices_for()
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let mut publisher = MockBusPublisher::new();
        expect_room_reply(&mut publisher, |m| m.contains("no devices"));

        let mut svc = service(directory, publisher);
        svc.handle_chat_message(CHAT_TOPIC, "!macme list").await.unwrap();
    }

    #[tokio::test]
    async fn presence_query_publishes_request_and_placeholder() {
        let directory = MockDeviceDirectory::new();
        let mut publisher = MockBusPublisher::new();
        publisher
            .expect_publish()
            .withf(|topic, payload, _| {
                // The placeholder reply is plain text, so only parse
                // payloads already matched to the command topic.
                topic == "macme/hq/command"
                    && serde_json::from_slice::<Envelope>(payload).is_ok_and(|request| {
                        request.command == CMD_GET_STATE
                            && !request.is_reply()
                            && request.correlation_id().is_some()
                            && request.option_str(OPT_CALLBACK_MODULE) == Some(MODULE_NAME)
                            && request.option_str(OPT_ROOM) == Some("lounge")
                    })
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        expect_room_reply(&mut publisher, |m| m.contains("Let me see"));

        let mut svc = service(directory, publisher);
        svc.handle_chat_message(CHAT_TOPIC, "!hq me").await.unwrap();
    }

    /// Runs a presence query, then feeds back a callback built from the
    /// captured request, returning the service for further assertions.
    async fn query_then_callback(state: Value, publisher_extra: MockBusPublisher) -> ChatService {
        let directory = MockDeviceDirectory::new();
        let mut svc = service(directory, publisher_extra);
        svc.handle_chat_message(CHAT_TOPIC, "!hq me").await.unwrap();

        let correlation_id = svc.pending.keys().next().unwrap().clone();
        let mut options = Map::new();
        options.insert(OPT_CORRELATION_ID.into(), Value::from(correlation_id));
        options.insert(OPT_CALLBACK_MODULE.into(), Value::from(MODULE_NAME));
        let request = Envelope::request(CMD_GET_STATE, options);
        let callback = Envelope::reply_to(&request, json!({ "state": state }));

        svc.handle_callback(callback).await.unwrap();
        svc
    }

    #[tokio::test]
    async fn callback_reply_deduplicates_display_names() {
        let mut publisher = MockBusPublisher::new();
        // Request + placeholder from the query itself.
        publisher
            .expect_publish()
            .withf(|topic, _, _| topic == "macme/hq/command")
            .times(1)
            .returning(|_, _, _| Ok(()));
        expect_room_reply(&mut publisher, |m| m.contains("Let me see"));
        // Final answer: Jane once despite two devices, plus John.
        expect_room_reply(&mut publisher, |m| {
            m.matches("Jane Doe").count() == 1 && m.contains("John Roe")
        });

        let state = serde_json::to_value(vec![
            owned_record("aa:bb:cc:dd:ee:01", "Jane Doe"),
            owned_record("aa:bb:cc:dd:ee:02", "Jane Doe"),
            owned_record("aa:bb:cc:dd:ee:03", "John Roe"),
        ])
        .unwrap();
        let svc = query_then_callback(state, publisher).await;
        assert!(svc.pending.is_empty());
    }

    #[tokio::test]
    async fn empty_state_produces_nobody_phrasing() {
        let mut publisher = MockBusPublisher::new();
        publisher
            .expect_publish()
            .withf(|topic, _, _| topic == "macme/hq/command")
            .times(1)
            .returning(|_, _, _| Ok(()));
        expect_room_reply(&mut publisher, |m| m.contains("Let me see"));
        expect_room_reply(&mut publisher, |m| m.to_lowercase().contains("nobody"));

        query_then_callback(json!([]), publisher).await;
    }

    #[tokio::test]
    async fn new_query_from_a_room_supersedes_the_unanswered_one() {
        let directory = MockDeviceDirectory::new();
        let mut publisher = MockBusPublisher::new();
        publisher
            .expect_publish()
            .withf(|topic, _, _| topic == "macme/hq/command")
            .times(2)
            .returning(|_, _, _| Ok(()));
        expect_room_reply(&mut publisher, |m| m.contains("Let me see"));
        expect_room_reply(&mut publisher, |m| m.contains("Let me see"));

        let mut svc = service(directory, publisher);
        svc.handle_chat_message(CHAT_TOPIC, "!hq me").await.unwrap();
        let stale_id = svc.pending.keys().next().unwrap().clone();
        svc.handle_chat_message(CHAT_TOPIC, "!hq me").await.unwrap();

        // Only the latest query remains answerable.
        assert_eq!(svc.pending.len(), 1);
        assert!(!svc.pending.contains_key(&stale_id));
    }

    #[tokio::test]
    async fn callback_with_unknown_correlation_id_is_ignored() {
        let directory = MockDeviceDirectory::new();
        let mut publisher = MockBusPublisher::new();
        publisher.expect_publish().times(0);
        let mut svc = service(directory, publisher);

        let mut options = Map::new();
        options.insert(OPT_CORRELATION_ID.into(), Value::from("never-issued"));
        options.insert(OPT_CALLBACK_MODULE.into(), Value::from(MODULE_NAME));
        let request = Envelope::request(CMD_GET_STATE, options);
        let callback = Envelope::reply_to(&request, json!({ "state": [] }));

        svc.handle_callback(callback).await.unwrap();
    }

    #[tokio::test]
    async fn callback_addressed_to_another_module_is_ignored() {
        let directory = MockDeviceDirectory::new();
        let mut publisher = MockBusPublisher::new();
        publisher.expect_publish().times(0);
        let mut svc = service(directory, publisher);

        let request = Envelope::request(CMD_GET_STATE, Map::new());
        let mut callback = Envelope::reply_to(&request, json!({ "state": [] }));
        callback.recipient = Some("someone_else".to_string());

        svc.handle_callback(callback).await.unwrap();
    }

    #[tokio::test]
    async fn register_list_deregister_round_trip() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Mutex;

        let mut directory = MockDeviceDirectory::new();
        directory
            .expect_find_by_nick()
            .times(4)
            .returning(|_| Ok(Some(jdoe())));
        directory
            .expect_register_device()
            .times(1)
            .returning(|_, _| Ok(()));
        directory
            .expect_deregister_device()
            .times(1)
            .returning(|_, _| Ok(()));
        let listings = AtomicUsize::new(0);
        directory.expect_devices_for().times(2).returning(move |_| {
            if listings.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec!["aa:bb:cc:dd:ee:ff".parse().unwrap()])
            } else {
                Ok(Vec::new())
            }
        });

        let replies = Arc::new(Mutex::new(Vec::new()));
        let seen = replies.clone();
        let mut publisher = MockBusPublisher::new();
        publisher
            .expect_publish()
            .times(4)
            .returning(move |_, payload, _| {
                seen.lock()
                    .unwrap()
                    .push(String::from_utf8(payload).unwrap());
                Ok(())
            });

        let mut svc = service(directory, publisher);
        for text in [
            "!macme register AA:BB:CC:DD:EE:FF",
            "!macme list",
            "!macme deregister AA:BB:CC:DD:EE:FF",
            "!macme list",
        ] {
            svc.handle_chat_message(CHAT_TOPIC, text).await.unwrap();
        }

        let replies = replies.lock().unwrap();
        assert!(replies[0].contains("Registered aa:bb:cc:dd:ee:ff"));
        assert!(replies[1].contains("aa:bb:cc:dd:ee:ff"));
        assert!(replies[2].contains("Deregistered aa:bb:cc:dd:ee:ff"));
        assert!(replies[3].contains("no devices"));
    }

    #[tokio::test]
    async fn link_command_updates_the_directory() {
        let mut directory = MockDeviceDirectory::new();
        directory
            .expect_link_nick()
            .withf(|uid, nick| uid == "jdoe" && nick == "jdoe")
            .times(1)
            .returning(|_, _| Ok(()));

        let mut publisher = MockBusPublisher::new();
        expect_room_reply(&mut publisher, |m| m.contains("Linked"));

        let mut svc = service(directory, publisher);
        svc.handle_chat_message(CHAT_TOPIC, "!macme link jdoe")
            .await
            .unwrap();
    }
}
