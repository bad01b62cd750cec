//! Background tasks that move data between queues and the transport.

pub(crate) mod send;
