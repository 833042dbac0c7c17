//! Per-qpair connection lifecycle (spec §4.H): admin-queue destruction
//! cascades a `FabricDisconnect` to every I/O connection in the session.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Invalid,
    Running,
    FabricDisconnect,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpairRole {
    Admin,
    Io,
}

#[derive(Debug)]
pub struct Connection {
    pub qid: u16,
    pub role: QpairRole,
    pub state: ConnectionState,
}

impl Connection {
    pub fn new(qid: u16, role: QpairRole) -> Self {
        Self {
            qid,
            role,
            state: ConnectionState::Running,
        }
    }

    /// True once per-poll teardown should run (spec §4.H "per-poll
    /// work": observe state and tear down if `Exiting` or
    /// `FabricDisconnect`).
    pub fn needs_teardown(&self) -> bool {
        matches!(self.state, ConnectionState::Exiting | ConnectionState::FabricDisconnect)
    }
}

/// One NVMe-oF session: one admin queue plus zero or more I/O queues,
/// sharing a cascade-teardown lifecycle (spec §4.H).
#[derive(Debug, Default)]
pub struct Session {
    connections: Vec<Connection>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, conn: Connection) {
        self.connections.push(conn);
    }

    /// Admin-queue destruction cascades `FabricDisconnect` to every
    /// remaining I/O connection in the session (spec §4.H).
    pub fn destroy_admin_queue(&mut self) {
        for conn in &mut self.connections {
            match conn.role {
                QpairRole::Admin => conn.state = ConnectionState::Exiting,
                QpairRole::Io => conn.state = ConnectionState::FabricDisconnect,
            }
        }
    }

    /// Drop every connection whose state calls for teardown, returning
    /// how many were removed.
    pub fn reap(&mut self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|c| !c.needs_teardown());
        before - self.connections.len()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_destruction_cascades_to_io_connections() {
        let mut session = Session::new();
        session.add(Connection::new(0, QpairRole::Admin));
        session.add(Connection::new(1, QpairRole::Io));
        session.add(Connection::new(2, QpairRole::Io));

        session.destroy_admin_queue();

        assert_eq!(session.connections[0].state, ConnectionState::Exiting);
        assert_eq!(session.connections[1].state, ConnectionState::FabricDisconnect);
        assert_eq!(session.connections[2].state, ConnectionState::FabricDisconnect);
    }

    #[test]
    fn reap_removes_only_terminal_connections() {
        let mut session = Session::new();
        session.add(Connection::new(0, QpairRole::Admin));
        session.add(Connection::new(1, QpairRole::Io));
        session.destroy_admin_queue();

        let removed = session.reap();
        assert_eq!(removed, 2);
        assert!(session.is_empty());
    }

    #[test]
    fn running_connection_does_not_need_teardown() {
        let conn = Connection::new(0, QpairRole::Io);
        assert!(!conn.needs_teardown());
    }
}
