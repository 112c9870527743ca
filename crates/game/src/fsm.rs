//! Table-driven finite state machine.
//!
//! States and events are plain `Copy` tokens. Each `(state, event)` pair maps
//! to the next state and an optional side effect. Firing an event that has no
//! entry is a protocol violation: the machine refuses it, keeps its state and
//! reports everything needed to diagnose the failure.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::net::Packet;

/// Side effect run before the machine advances.
pub type Action<C> = fn(&mut C, Option<&Packet>);

struct Transition<S, C> {
    next: S,
    action: Option<Action<C>>,
}

#[derive(Debug, thiserror::Error)]
#[error("{machine}: no transition for {event:?} in state {state:?}")]
pub struct TransitionError<S: Debug, E: Debug> {
    pub machine: &'static str,
    pub state: S,
    pub event: E,
    pub packet: Option<Packet>,
}

pub struct StateMachine<S, E, C> {
    name: &'static str,
    state: S,
    table: HashMap<(S, E), Transition<S, C>>,
}

impl<S, E, C> StateMachine<S, E, C>
where
    S: Copy + Eq + Hash + Debug,
    E: Copy + Eq + Hash + Debug,
{
    pub fn new(name: &'static str, initial: S) -> Self {
        Self {
            name,
            state: initial,
            table: HashMap::new(),
        }
    }

    /// Registers `from --event--> to` with no side effect.
    pub fn on(mut self, from: S, event: E, to: S) -> Self {
        self.table.insert(
            (from, event),
            Transition {
                next: to,
                action: None,
            },
        );
        self
    }

    /// Registers `from --event--> to`, running `action` first.
    pub fn on_with(mut self, from: S, event: E, to: S, action: Action<C>) -> Self {
        self.table.insert(
            (from, event),
            Transition {
                next: to,
                action: Some(action),
            },
        );
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> S {
        self.state
    }

    pub fn can_fire(&self, event: E) -> bool {
        self.table.contains_key(&(self.state, event))
    }

    /// Runs the transition for `event` and returns the new state.
    ///
    /// Actions must not fire this machine again; the owner holds its lock
    /// for the duration of the call.
    pub fn fire(
        &mut self,
        ctx: &mut C,
        event: E,
        packet: Option<&Packet>,
    ) -> Result<S, TransitionError<S, E>> {
        let Some(transition) = self.table.get(&(self.state, event)) else {
            return Err(TransitionError {
                machine: self.name,
                state: self.state,
                event,
                packet: packet.cloned(),
            });
        };

        let next = transition.next;
        if let Some(action) = transition.action {
            action(ctx, packet);
        }

        log::trace!("{}: {:?} --{:?}--> {:?}", self.name, self.state, event, next);
        self.state = next;
        Ok(next)
    }

    /// Parks the machine in `state` without consulting the table.
    pub fn halt(&mut self, state: S) {
        log::debug!("{}: halted in {:?} (was {:?})", self.name, state, self.state);
        self.state = state;
    }
}

impl<S: Debug, E, C> Debug for StateMachine<S, E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("transitions", &self.table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::net::PacketKind;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Door {
        Closed,
        Open,
        Locked,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Push {
        Open,
        Close,
        Lock,
    }

    #[derive(Default)]
    struct Log {
        entries: Vec<&'static str>,
        saw_packet: bool,
    }

    fn door() -> StateMachine<Door, Push, Log> {
        StateMachine::new("door", Door::Closed)
            .on_with(Door::Closed, Push::Open, Door::Open, |log: &mut Log, packet| {
                log.entries.push("opened");
                log.saw_packet = packet.is_some();
            })
            .on(Door::Open, Push::Close, Door::Closed)
            .on(Door::Closed, Push::Lock, Door::Locked)
    }

    #[test]
    fn follows_table() {
        let mut machine = door();
        let mut log = Log::default();

        assert_eq!(machine.fire(&mut log, Push::Open, None).unwrap(), Door::Open);
        assert_eq!(machine.fire(&mut log, Push::Close, None).unwrap(), Door::Closed);
        assert_eq!(machine.fire(&mut log, Push::Lock, None).unwrap(), Door::Locked);
        assert_eq!(log.entries, vec!["opened"]);
    }

    #[test]
    fn missing_transition_is_reported_and_state_kept() {
        let mut machine = door();
        let mut log = Log::default();
        let packet = Packet::new(
            PacketKind::Ping,
            "127.0.0.1:1".parse().unwrap(),
            Bytes::new(),
        );

        let err = machine
            .fire(&mut log, Push::Close, Some(&packet))
            .unwrap_err();

        assert_eq!(err.machine, "door");
        assert_eq!(err.state, Door::Closed);
        assert_eq!(err.event, Push::Close);
        assert_eq!(err.packet, Some(packet));
        assert_eq!(machine.state(), Door::Closed);
        assert!(err.to_string().contains("Close"));
        assert!(log.entries.is_empty());
    }

    #[test]
    fn action_sees_packet() {
        let mut machine = door();
        let mut log = Log::default();
        let packet = Packet::handshake("127.0.0.1:1".parse().unwrap());

        machine.fire(&mut log, Push::Open, Some(&packet)).unwrap();
        assert!(log.saw_packet);
    }

    #[test]
    fn halt_bypasses_table() {
        let mut machine = door();
        machine.halt(Door::Locked);
        assert_eq!(machine.state(), Door::Locked);
        assert!(!machine.can_fire(Push::Open));
    }
}
