use std::collections::HashMap;

use super::CommandKind;

/// Invocation context handed to checks and command handlers
#[derive(Debug, Clone)]
pub struct Context {
    pub command: String,
    pub kind: CommandKind,
    pub args: Vec<String>,
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    pub data: HashMap<String, String>,
}

impl Context {
    pub fn new(kind: CommandKind, command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            kind,
            args: Vec::new(),
            user_id: None,
            channel_id: None,
            data: HashMap::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }
}
