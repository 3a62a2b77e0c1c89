use common::domain::MacAddress;
use regex::Regex;

/// The fixed set of chat commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Register,
    Deregister,
    Link,
    List,
    Presence,
    Help,
}

/// Free-text command grammar: an ordered list of (kind, pattern) rules
/// plus the argument extractors.
///
/// Rule order is load-bearing. Patterns are tried top to bottom and the
/// first match wins, so a message containing several trigger words
/// resolves deterministically to the earliest rule. Word boundaries keep
/// `register` from swallowing `deregister`.
pub struct CommandGrammar {
    triggers: Vec<Regex>,
    rules: Vec<(CommandKind, Regex)>,
    mac: Regex,
    link_arg: Regex,
    nick: Regex,
    room: Regex,
}

impl CommandGrammar {
    pub fn new(zone: &str) -> Self {
        let rule = |kind, pattern: &str| (kind, Regex::new(pattern).expect("static pattern"));
        Self {
            triggers: vec![
                Regex::new(r"(?i)\b(device|macme)\b").expect("static pattern"),
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(zone))).expect("static pattern"),
            ],
            rules: vec![
                rule(CommandKind::Register, r"(?i)\bregister\b"),
                rule(CommandKind::Deregister, r"(?i)\b(deregister|remove)\b"),
                rule(CommandKind::Link, r"(?i)\blink\b"),
                rule(CommandKind::List, r"(?i)\b(list|view)\b"),
                rule(CommandKind::Presence, r"(?i)\bme\b"),
            ],
            mac: Regex::new(r"(?i)([0-9A-F]{2}[:-]){5}[0-9A-F]{2}").expect("static pattern"),
            link_arg: Regex::new(r"(?i)\blink\s+(\S+)").expect("static pattern"),
            nick: Regex::new(r"nick/(\w+)/said").expect("static pattern"),
            room: Regex::new(r"room/(\w+)/").expect("static pattern"),
        }
    }

    /// Whether the message addresses this system at all.
    pub fn is_zone_command(&self, text: &str) -> bool {
        self.triggers.iter().any(|trigger| trigger.is_match(text))
    }

    /// First matching rule wins; anything unrecognized is a help request.
    pub fn classify(&self, text: &str) -> CommandKind {
        self.rules
            .iter()
            .find(|(_, pattern)| pattern.is_match(text))
            .map(|(kind, _)| *kind)
            .unwrap_or(CommandKind::Help)
    }

    /// Pull a hardware address argument out of the message, if any.
    pub fn mac_argument(&self, text: &str) -> Option<MacAddress> {
        self.mac
            .find(text)
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Identity argument of a `link` command.
    pub fn link_argument<'t>(&self, text: &'t str) -> Option<&'t str> {
        capture_one(&self.link_arg, text)
    }

    /// Sender nick embedded in the chat bridge topic.
    pub fn nick_from_topic<'t>(&self, topic: &'t str) -> Option<&'t str> {
        capture_one(&self.nick, topic)
    }

    /// Reply room embedded in the chat bridge topic.
    pub fn room_from_topic<'t>(&self, topic: &'t str) -> Option<&'t str> {
        capture_one(&self.room, topic)
    }
}

fn capture_one<'t>(pattern: &Regex, haystack: &'t str) -> Option<&'t str> {
    pattern
        .captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar() -> CommandGrammar {
        CommandGrammar::new("hq")
    }

    #[test]
    fn messages_without_triggers_are_not_commands() {
        let g = grammar();
        assert!(!g.is_zone_command("foo bar"));
        assert!(!g.is_zone_command("who is around?"));
    }

    #[test]
    fn trigger_words_and_zone_name_qualify() {
        let g = grammar();
        assert!(g.is_zone_command("!macme list"));
        assert!(g.is_zone_command("hey device register aa:bb:cc:dd:ee:ff"));
        assert!(g.is_zone_command("!hq me"));
        assert!(g.is_zone_command("MACME LIST"));
    }

    #[test]
    fn classification_order_is_deterministic() {
        let g = grammar();
        // Declared order: register, deregister/remove, link, list/view, me.
        // A message hitting both "register" and "list" resolves to the
        // earlier rule.
        assert_eq!(
            g.classify("macme register aa:bb:cc:dd:ee:ff and list"),
            CommandKind::Register
        );
        assert_eq!(g.classify("macme list register"), CommandKind::Register);
    }

    #[test]
    fn deregister_is_not_shadowed_by_register() {
        let g = grammar();
        assert_eq!(
            g.classify("macme deregister aa:bb:cc:dd:ee:ff"),
            CommandKind::Deregister
        );
        assert_eq!(
            g.classify("macme remove aa:bb:cc:dd:ee:ff"),
            CommandKind::Deregister
        );
    }

    #[test]
    fn remaining_kinds_classify() {
        let g = grammar();
        assert_eq!(g.classify("macme link jdoe"), CommandKind::Link);
        assert_eq!(g.classify("macme list"), CommandKind::List);
        assert_eq!(g.classify("macme view"), CommandKind::List);
        assert_eq!(g.classify("!hq me"), CommandKind::Presence);
        assert_eq!(g.classify("macme wat"), CommandKind::Help);
    }

    #[test]
    fn mac_argument_extraction() {
        let g = grammar();
        assert_eq!(
            g.mac_argument("macme register AA:BB:CC:DD:EE:FF please")
                .unwrap()
                .as_str(),
            "aa:bb:cc:dd:ee:ff"
        );
        assert_eq!(
            g.mac_argument("macme register aa-bb-cc-dd-ee-ff")
                .unwrap()
                .as_str(),
            "aa:bb:cc:dd:ee:ff"
        );
        assert!(g.mac_argument("macme register zz:zz").is_none());
        assert!(g.mac_argument("macme register").is_none());
    }

    #[test]
    fn topic_extraction() {
        let g = grammar();
        let topic = "irc/room/lounge/nick/jdoe/said";
        assert_eq!(g.nick_from_topic(topic), Some("jdoe"));
        assert_eq!(g.room_from_topic(topic), Some("lounge"));
        assert_eq!(g.nick_from_topic("irc/room/lounge/topic"), None);
        assert_eq!(g.room_from_topic("irc/misc"), None);
    }

    #[test]
    fn link_argument_extraction() {
        let g = grammar();
        assert_eq!(g.link_argument("macme link jdoe"), Some("jdoe"));
        assert_eq!(g.link_argument("macme link"), None);
    }
}
