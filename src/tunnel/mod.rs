//! The tunnel core: wire framing, message grammar, duplex channel, and the
//! agent registry.
//!
//! ## Wire format
//!
//! Every tunnel message is one binary WebSocket frame:
//!
//! ```text
//! [metadata_len: u32 LE][metadata_len bytes of UTF-8 JSON][binary payload]
//! ```
//!
//! Control-plane fields ride in the JSON metadata (an object with a `type`
//! discriminator); body chunks ride as the raw payload so they never pay the
//! base64 tax. The payload is empty for every message except `data` and
//! `request-data`.
//!
//! ## Message types (agent → server)
//!
//! | Type             | Fields                                         | Meaning                                  |
//! |------------------|------------------------------------------------|------------------------------------------|
//! | `register`       | `id`, `apiKey`, `domain`                       | Claim `domain` for this session          |
//! | `response-start` | `id`, `statusCode`, `statusMessage`, `headers` | Begin the HTTP response for `id`         |
//! | `data`           | `id` + payload                                 | Response body chunk                      |
//! | `data-end`       | `id`, `error?`                                 | Response complete                        |
//! | `ws-opened`      | `id`                                           | Reserved for tunneled WebSocket flows    |
//! | `ws-message`     | `id`, `data?`                                  | Reserved                                 |
//! | `ws-closed`      | `id`                                           | Reserved                                 |
//!
//! ## Message types (server → agent)
//!
//! | Type            | Fields                                                | Meaning                        |
//! |-----------------|-------------------------------------------------------|--------------------------------|
//! | `registered`    | `id`, `domain`                                        | Ack of `register`              |
//! | `request-start` | `id`, `domain`, `method`, `url`, `headers`, `hasBody` | Begin an inbound HTTP request  |
//! | `request-data`  | `id` + payload                                        | Request body chunk             |
//! | `request-end`   | `id`                                                  | Request body complete          |
//! | `error`         | `message`                                             | Session-level error report     |
//!
//! For a single correlation id in a single direction the wire is totally
//! ordered: `response-start` strictly precedes any `data`, and every `data`
//! strictly precedes `data-end`. Between different ids there is no ordering
//! guarantee.

pub mod channel;
pub mod codec;
pub mod messages;
pub mod registry;
pub mod session;
