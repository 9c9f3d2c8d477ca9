use std::{net::SocketAddr, sync::Arc};

use super::{CONNECTION, Connection, SOCKET_CONTEXT};
use crate::{Args, Carrier, DefaultFixer, Fixer, ServiceContext, io::ValueType};

/// Transport context of one connection, shared by all of its requests.
#[derive(Clone, Debug)]
pub struct SocketContext {
    connection: Connection,
}

impl SocketContext {
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// The live connection, which functions may use to close it.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer_addr()
    }
}

/// Adds the [`SOCKET_CONTEXT`] and [`CONNECTION`] parameter types to the
/// ones [`DefaultFixer`] binds.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketFixer;

impl Fixer for SocketFixer {
    fn fix_arguments(&self, last: &ValueType, args: &mut Args, ctx: &ServiceContext) {
        if *last == SOCKET_CONTEXT {
            if let Some(handle) = ctx.transport_handle()
                && handle.is::<SocketContext>()
            {
                args.fix(Carrier::Transport(handle.clone()));
            }
        } else if *last == CONNECTION {
            if let Some(socket_ctx) = ctx.transport::<SocketContext>() {
                args.fix(Carrier::Transport(Arc::new(socket_ctx.connection().clone())));
            }
        } else {
            DefaultFixer.fix_arguments(last, args, ctx);
        }
    }
}
