//! MCP (Model Context Protocol) front end of the router.
//!
//! Clients see one MCP server whose tool list is the union of every enabled
//! downstream server, with tools named `<server>:<tool>`.
//!
//! - [`protocol`]: JSON-RPC 2.0 envelope types and error codes.
//! - [`server`]: method dispatch shared by every transport.
//! - [`router`]: tool resolution and call forwarding.
//! - [`forward`]: outbound HTTP per execution backend.
//! - [`transport`]: SSE sessions (`GET /sse` + `POST /message`).
//!
//! Protocol: <https://spec.modelcontextprotocol.io/2024-11-05/>

pub mod forward;
pub mod protocol;
pub mod router;
pub mod server;
pub mod transport;
