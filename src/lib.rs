//! A typed slot/step/effect pipeline engine for HTTP/1.1 application
//! servers.
//!
//! A request enters through [`server::Server::handle_request`], is parsed by
//! [`http`], dispatched by [`route::Router`], and driven step-by-step by
//! [`interpreter::run`] until a step returns `Decision::Done` or `Fail`.
//! Steps declare their slot reads/writes at compile time (see [`slot`] and
//! [`context::view`]) and describe impure work as data (see [`decision`]),
//! which [`executor`] carries out against an embedder-supplied
//! [`executor::EffectHandler`].
//!
//! The crate is organized the way a request actually flows through it:
//! wire parsing (`http`) feeds the route table (`route`), which selects the
//! steps the interpreter (`interpreter`) drives against a per-request
//! context (`context`, `arena`, `slot`) using the IR in `decision`, with
//! impure work farmed out to `executor` under the policies in `config` and
//! `security`, observed through `trace`, and failures rendered by
//! `error_pipeline`. `server` ties all of it together behind the embedding
//! surface; `test_support` is a small toolkit for testing code built on top
//! of it.

pub mod arena;
pub mod config;
pub mod context;
pub mod decision;
pub mod error_pipeline;
pub mod executor;
pub mod http;
pub mod interpreter;
pub mod route;
pub mod security;
pub mod server;
pub mod slot;
pub mod step;
pub mod trace;

#[doc(hidden)]
pub mod test_support;

pub use config::{AssertionPolicy, ResourceBudget, SecurityPolicy, ServerConfig};
pub use decision::{Decision, Effect, Error, ErrorKind, Join, Mode, Need, Response};
pub use error_pipeline::ErrorRenderer;
pub use executor::EffectHandler;
pub use route::RouteSpec;
pub use server::Server;
pub use step::Step;
pub use trace::TraceSink;
