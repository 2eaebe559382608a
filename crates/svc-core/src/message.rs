//! The message envelope services exchange, and the receipt a sender gets
//! back for a send.
//!
//! A `Message` is reference-free: it is allocated once by its sender,
//! transferred through exactly one inbox slot, and released by whoever
//! last holds it (the consuming service, or the scheduler if it is never
//! delivered). There is no shared ownership and no refcounting.

use crate::id::ServiceId;

/// Application-level tag carried on every message, mirroring the original
/// `PTYPE_*` constants. `System`/`Signal` carry no payload; the
/// `ScheduleNew`/`ScheduleDel` pair is only meaningful when `to == NONE`
/// (the root's schedule-control channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    System = 0,
    Request = 1,
    Response = 2,
    Error = 3,
    Signal = 4,
    Idle = 5,
    ScheduleNew = 6,
    ScheduleDel = 7,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => MessageType::System,
            1 => MessageType::Request,
            2 => MessageType::Response,
            3 => MessageType::Error,
            4 => MessageType::Signal,
            5 => MessageType::Idle,
            6 => MessageType::ScheduleNew,
            _ => MessageType::ScheduleDel,
        }
    }
}

/// An owned, immutable envelope. `payload` is `None` for signal/control
/// messages that carry no body.
#[derive(Debug, Clone)]
pub struct Message {
    pub from: ServiceId,
    pub to: ServiceId,
    pub session: u32,
    pub kind: MessageType,
    pub payload: Option<Box<[u8]>>,
}

impl Message {
    pub fn new(from: ServiceId, to: ServiceId, session: u32, kind: MessageType, payload: Option<Vec<u8>>) -> Self {
        Self {
            from,
            to,
            session,
            kind,
            payload: payload.map(Vec::into_boxed_slice),
        }
    }

    /// A zero-payload signal message from `from` to `to`.
    pub fn signal(from: ServiceId, to: ServiceId, session: u32) -> Self {
        Self { from, to, session, kind: MessageType::Signal, payload: None }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.payload.as_ref().map_or(0, |p| p.len())
    }
}

/// The scheduler's response to a previously sent message. Exactly one
/// receipt is outstanding per service at a time; a `Response` receipt may
/// carry a bounced-back message read ahead of the normal inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    None,
    Done,
    Error,
    Block,
    Response,
}

/// A receipt slot holds the kind plus an optional bounce message. Writing
/// a new receipt over a `None` slot is the expected case; writing over a
/// non-`None`, unread receipt drops the previous bounce and is a caller
/// bug the scheduler logs a warning for (see `Service::write_receipt`).
#[derive(Debug)]
pub struct Receipt {
    pub kind: ReceiptKind,
    pub bounce: Option<Message>,
}

impl Receipt {
    pub const EMPTY: Receipt = Receipt { kind: ReceiptKind::None, bounce: None };

    pub fn new(kind: ReceiptKind, bounce: Option<Message>) -> Self {
        Self { kind, bounce }
    }
}
