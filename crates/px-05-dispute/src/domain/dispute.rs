//! A dispute as stored by one trader.

use shared_types::{ChatMessage, DisputeInfo, DisputeResult, SupportType, TradeId};

/// One dispute with its chat transcript and, once decided, its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispute {
    pub info: DisputeInfo,
    /// Whether this node opened it.
    pub opened_by_self: bool,
    pub chat: Vec<ChatMessage>,
    pub result: Option<DisputeResult>,
    pub closed: bool,
}

impl Dispute {
    pub fn new(info: DisputeInfo, opened_by_self: bool) -> Self {
        Self {
            info,
            opened_by_self,
            chat: Vec::new(),
            result: None,
            closed: false,
        }
    }

    pub fn trade_id(&self) -> TradeId {
        self.info.trade_id
    }

    pub fn support_type(&self) -> SupportType {
        self.info.support_type
    }

    /// Append a chat line unless one with the same uid is already stored.
    pub fn add_chat(&mut self, message: ChatMessage) -> bool {
        if self.chat.iter().any(|m| m.uid == message.uid) {
            return false;
        }
        self.chat.push(message);
        true
    }

    /// Store the agent's result. The first one wins.
    pub fn set_result(&mut self, result: DisputeResult) -> bool {
        if self.result.is_some() {
            return false;
        }
        self.result = Some(result);
        true
    }

    /// Mark closed. Returns whether it was open.
    pub fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }
}
