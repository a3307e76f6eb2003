//! flows that span a round trip through an external service. the reply is
//! handled by a later, independent invocation

pub mod zip;
