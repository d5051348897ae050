//! Command string parsing.
//!
//! A request's `command` is either `Service.Method` (dispatched to a
//! registered service) or one of the special event-listener commands the
//! server handles itself.

use crate::error::ProtocolError;
use std::fmt;

/// A parsed `Service.Method` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCommand {
    pub service_name: String,
    pub method_name: String,
}

impl MethodCommand {
    /// Parses a command string. Exactly two non-empty dot-separated
    /// parts are required.
    pub fn parse(command: &str) -> Result<Self, ProtocolError> {
        let mut parts = command.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(service), Some(method), None) if !service.is_empty() && !method.is_empty() => {
                Ok(Self {
                    service_name: service.to_string(),
                    method_name: method.to_string(),
                })
            }
            _ => Err(ProtocolError::MalformedCommand(command.to_string())),
        }
    }
}

impl fmt::Display for MethodCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service_name, self.method_name)
    }
}

/// Commands the server handles itself, ahead of service dispatch. They
/// form the event multiplexer's control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialCommand {
    /// `addEventListener(key, eventName, info)`
    AddEventListener,
    /// `removeEventListener(key)`
    RemoveEventListener,
    /// `getEventListenerInfos(eventName) -> [{key, info}]`
    GetEventListenerInfos,
    /// `emitEvent(targetKeys, data)`
    EmitEvent,
}

impl SpecialCommand {
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "addEventListener" => Some(Self::AddEventListener),
            "removeEventListener" => Some(Self::RemoveEventListener),
            "getEventListenerInfos" => Some(Self::GetEventListenerInfos),
            "emitEvent" => Some(Self::EmitEvent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddEventListener => "addEventListener",
            Self::RemoveEventListener => "removeEventListener",
            Self::GetEventListenerInfos => "getEventListenerInfos",
            Self::EmitEvent => "emitEvent",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let cmd = MethodCommand::parse("FileService.readDir").unwrap();
        assert_eq!(cmd.service_name, "FileService");
        assert_eq!(cmd.method_name, "readDir");
        assert_eq!(cmd.to_string(), "FileService.readDir");
    }

    #[test]
    fn test_parse_no_separator() {
        let result = MethodCommand::parse("Foo");
        assert!(matches!(result, Err(ProtocolError::MalformedCommand(_))));
    }

    #[test]
    fn test_parse_empty_parts() {
        assert!(MethodCommand::parse(".method").is_err());
        assert!(MethodCommand::parse("Service.").is_err());
        assert!(MethodCommand::parse(".").is_err());
        assert!(MethodCommand::parse("").is_err());
    }

    #[test]
    fn test_parse_extra_parts() {
        assert!(MethodCommand::parse("A.b.c").is_err());
    }

    #[test]
    fn test_special_commands() {
        assert_eq!(
            SpecialCommand::from_command("addEventListener"),
            Some(SpecialCommand::AddEventListener)
        );
        assert_eq!(
            SpecialCommand::from_command("emitEvent"),
            Some(SpecialCommand::EmitEvent)
        );
        assert_eq!(SpecialCommand::from_command("Service.method"), None);
        assert_eq!(
            SpecialCommand::GetEventListenerInfos.as_str(),
            "getEventListenerInfos"
        );
    }
}
