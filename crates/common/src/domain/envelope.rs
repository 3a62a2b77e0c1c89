use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Command tag for a presence snapshot request.
pub const CMD_GET_STATE: &str = "get_state";

/// Option keys with protocol meaning. Everything else in `options` is
/// requester-private and echoed back untouched.
pub const OPT_CORRELATION_ID: &str = "correlation_id";
pub const OPT_CALLBACK_MODULE: &str = "callback_module";
pub const OPT_ROOM: &str = "room";
pub const OPT_NICK: &str = "nick";

/// Protocol message for the fabricated request/response layer.
///
/// The bus has no RPC, so two well-known topics carry these instead: an
/// envelope without `response` on the command topic is a request; the
/// handler publishes the same envelope on the callback topic with
/// `response` filled in and `options` echoed verbatim. Requesters match
/// replies on the `correlation_id` they put into `options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub command: String,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

impl Envelope {
    pub fn request(command: impl Into<String>, options: Map<String, Value>) -> Self {
        Self {
            command: command.into(),
            options,
            response: None,
            recipient: None,
        }
    }

    /// Build the reply to `request`, echoing its command and options.
    /// The `recipient` is taken from the request's `callback_module`
    /// option so other modules on the callback topic can skip it.
    pub fn reply_to(request: &Envelope, response: Value) -> Self {
        Self {
            command: request.command.clone(),
            options: request.options.clone(),
            response: Some(response),
            recipient: request.option_str(OPT_CALLBACK_MODULE).map(str::to_string),
        }
    }

    pub fn is_reply(&self) -> bool {
        self.response.is_some()
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.option_str(OPT_CORRELATION_ID)
    }

    /// Whether `module` must consume this envelope. An envelope without a
    /// recipient tag is addressed to whoever handles its command.
    pub fn addressed_to(&self, module: &str) -> bool {
        match &self.recipient {
            Some(recipient) => recipient == module,
            None => true,
        }
    }
}
