use std::collections::HashMap;

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::err::Error;
use crate::substrate::{DatagramSocket, OutputSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

#[derive(Default)]
pub struct Registry<S: DatagramSocket> {
    connections: HashMap<ConnId, Connection<S>>,
    next_id: u64,
}

impl<S: DatagramSocket> Registry<S> {
    pub fn new() -> Self {
        Registry {
            connections: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn insert(&mut self, socket: S, config: ConnectionConfig) -> ConnId {
        let id = ConnId(self.next_id);
        self.next_id += 1;
        self.connections.insert(id, Connection::new(socket, config));
        id
    }

    pub fn remove(&mut self, id: ConnId) -> Option<Connection<S>> {
        self.connections.remove(&id)
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection<S>> {
        self.connections.get_mut(&id)
    }

    pub fn get_mut_or_err(&mut self, id: ConnId) -> Result<&mut Connection<S>, Error> {
        self.connections.get_mut(&id).ok_or(Error::UnknownConnection(id))
    }

    pub fn remove_or_err(&mut self, id: ConnId) -> Result<Connection<S>, Error> {
        self.connections.remove(&id).ok_or(Error::UnknownConnection(id))
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.connections.keys().copied()
    }

    pub fn on_tick(&mut self, now_ms: u64, mut output_for: impl FnMut(ConnId) -> Box<dyn OutputSink + '_>) {
        let mut dead = Vec::new();

        for (&id, conn) in self.connections.iter_mut() {
            let mut output = output_for(id);
            if conn.on_tick(output.as_mut(), now_ms) {
                dead.push(id);
            }
        }

        for id in dead {
            self.connections.remove(&id);
        }
    }
}
