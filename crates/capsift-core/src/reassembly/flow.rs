use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;

/// Unordered endpoint pair identifying a TCP connection.
///
/// `FlowKey::new(a, b) == FlowKey::new(b, a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FlowKey {
    low: SocketAddr,
    high: SocketAddr,
}

impl FlowKey {
    pub fn new(a: SocketAddr, b: SocketAddr) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn endpoints(&self) -> (SocketAddr, SocketAddr) {
        (self.low, self.high)
    }

    pub fn direction_of(&self, src: SocketAddr) -> Direction {
        if src == self.low {
            Direction::LowToHigh
        } else {
            Direction::HighToLow
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    LowToHigh,
    HighToLow,
}

/// One direction of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StreamId {
    pub flow: FlowKey,
    pub direction: Direction,
}

impl StreamId {
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        let flow = FlowKey::new(src, dst);
        Self {
            flow,
            direction: flow.direction_of(src),
        }
    }

    pub fn src(&self) -> SocketAddr {
        match self.direction {
            Direction::LowToHigh => self.flow.low,
            Direction::HighToLow => self.flow.high,
        }
    }

    pub fn dst(&self) -> SocketAddr {
        match self.direction {
            Direction::LowToHigh => self.flow.high,
            Direction::HighToLow => self.flow.low,
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src(), self.dst())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn flow_key_is_unordered() {
        let a = addr("10.0.0.1:1234");
        let b = addr("10.0.0.2:80");
        assert_eq!(FlowKey::new(a, b), FlowKey::new(b, a));
    }

    #[test]
    fn stream_ids_distinguish_directions() {
        let a = addr("10.0.0.1:1234");
        let b = addr("10.0.0.2:80");
        let forward = StreamId::new(a, b);
        let backward = StreamId::new(b, a);
        assert_eq!(forward.flow, backward.flow);
        assert_ne!(forward, backward);
        assert_eq!(forward.src(), a);
        assert_eq!(backward.src(), b);
        assert_eq!(forward.to_string(), "10.0.0.1:1234->10.0.0.2:80");
    }
}
