#![forbid(unsafe_code)]

mod error;
pub use error::{Error, ErrorKind, Result};

mod config;
pub use config::ServiceConfig;

pub mod fault;
pub mod io;

mod method;
pub use method::{Args, Carrier, Function, Method, MethodOptions, ResultMode, Signature};

mod registry;
pub use registry::{Registry, WILDCARD};

mod context;
pub use context::ServiceContext;

mod event;
pub use event::ServiceEvent;

mod filter;
pub use filter::Filter;

mod handler;
pub use handler::{FilterHandler, InvokeHandler, NextFilter, NextInvoke};

mod fixer;
pub use fixer::{DefaultFixer, Fixer};

mod service;
pub use service::Service;

mod task_supervisor;
pub use task_supervisor::{TaskSupervisor, TaskSupervisorGuard};

pub mod tcp;

mod socket_service;
pub use socket_service::SocketService;
