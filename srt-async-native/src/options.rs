//! SRT socket options
//!
//! The full `SRTO_*` enumeration with its native numeric values, plus the
//! typed value union passed through `set_sock_opt`/`get_sock_opt`.

/// Socket option identifiers, numerically identical to the native
/// `SRT_SOCKOPT` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SockOpt {
    Mss = 0,
    SndSyn = 1,
    RcvSyn = 2,
    Isn = 3,
    Fc = 4,
    SndBuf = 5,
    RcvBuf = 6,
    Linger = 7,
    UdpSndBuf = 8,
    UdpRcvBuf = 9,
    Rendezvous = 12,
    SndTimeO = 13,
    RcvTimeO = 14,
    ReuseAddr = 15,
    MaxBw = 16,
    State = 17,
    Event = 18,
    SndData = 19,
    RcvData = 20,
    Sender = 21,
    TsbPdMode = 22,
    Latency = 23,
    InputBw = 24,
    OHeadBw = 25,
    Passphrase = 26,
    PbKeyLen = 27,
    KmState = 28,
    IpTtl = 29,
    IpTos = 30,
    TlPktDrop = 31,
    SndDropDelay = 32,
    NakReport = 33,
    Version = 34,
    PeerVersion = 35,
    ConnTimeO = 36,
    DriftTracer = 37,
    MinInputBw = 38,
    SndKmState = 40,
    RcvKmState = 41,
    LossMaxTtl = 42,
    RcvLatency = 43,
    PeerLatency = 44,
    MinVersion = 45,
    StreamId = 46,
    Congestion = 47,
    MessageApi = 48,
    PayloadSize = 49,
    TransType = 50,
    KmRefreshRate = 51,
    KmPreAnnounce = 52,
    EnforcedEncryption = 53,
    Ipv6Only = 54,
    PeerIdleTimeO = 55,
    BindToDevice = 56,
    PacketFilter = 60,
    RetransmitAlgo = 61,
}

impl SockOpt {
    /// Native numeric identifier.
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Typed option value.
///
/// SRT options are bool, int, int64 or string valued depending on the
/// identifier; the union keeps the wire call generic while the caller stays
/// typed.
#[derive(Debug, Clone, PartialEq)]
pub enum OptValue {
    Bool(bool),
    Int(i32),
    Int64(i64),
    Str(String),
}

impl OptValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            OptValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int64(&self) -> Option<i64> {
        match self {
            OptValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for OptValue {
    fn from(v: bool) -> Self {
        OptValue::Bool(v)
    }
}

impl From<i32> for OptValue {
    fn from(v: i32) -> Self {
        OptValue::Int(v)
    }
}

impl From<i64> for OptValue {
    fn from(v: i64) -> Self {
        OptValue::Int64(v)
    }
}

impl From<&str> for OptValue {
    fn from(v: &str) -> Self {
        OptValue::Str(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_numeric_values() {
        assert_eq!(SockOpt::Mss.as_raw(), 0);
        assert_eq!(SockOpt::RcvSyn.as_raw(), 2);
        assert_eq!(SockOpt::Sender.as_raw(), 21);
        assert_eq!(SockOpt::MessageApi.as_raw(), 48);
        assert_eq!(SockOpt::PayloadSize.as_raw(), 49);
        assert_eq!(SockOpt::RetransmitAlgo.as_raw(), 61);
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(OptValue::Bool(true).as_bool(), Some(true));
        assert_eq!(OptValue::Int(1316).as_int(), Some(1316));
        assert_eq!(OptValue::Int64(-1).as_int64(), Some(-1));
        assert_eq!(OptValue::from("live").as_str(), Some("live"));
        assert_eq!(OptValue::Bool(true).as_int(), None);
    }
}
