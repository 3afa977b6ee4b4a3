//! Fixed detection thresholds, lookback windows and protocol constants.
//!
//! Windows are expressed in milliseconds of capture time, not wall-clock time:
//! every comparison is made against the timestamp of the frame currently being
//! processed.

/// Lookback window for the smurf detector.
///
/// Echo replies to one destination older than this are pruned before the
/// distinct-source count is taken.
pub const SMURF_WINDOW_MS:      i64 = 600;

/// Distinct echo-reply sources for one destination at which a smurf attack
/// is reported (inclusive).
pub const SMURF_THRESHOLD:      usize = 21;

/// Lookback window for unacknowledged SYNs held per server.
pub const SYN_FLOOD_WINDOW_MS:  i64 = 600;

/// Number of pending SYNs per server that is still considered normal. One more
/// than this opens a SYN FLOOD record.
pub const SYN_FLOOD_MAX_UNACKED: usize = 14;

/// Lookback window for the per-address-pair port-scan count.
pub const PORT_SCAN_WINDOW_MS:  i64 = 600;

/// Distinct destination ports between one address pair at which a port scan
/// is reported (inclusive).
pub const PORT_SCAN_THRESHOLD:  usize = 21;

/// Lookback window for failed Telnet logins and watch-list entries.
///
/// Much longer than the flood windows because a human-paced or scripted
/// dictionary attack only manages a few attempts every few seconds.
pub const BRUTE_FORCE_WINDOW_MS: i64 = 30_000;

/// Failed Telnet logins for one address pair at which a brute-force attack
/// is reported (inclusive).
pub const BRUTE_FORCE_THRESHOLD: usize = 4;

/// How long the fragments of one IPv4 datagram are held, counted from the
/// first fragment seen, before the datagram is given up on.
pub const FRAGMENT_TIMEOUT_MS:  i64 = 30_000;

/// Well-known Telnet server port.
pub const TELNET_PORT:          u16 = 23;

/// Largest legal ICMP message carried by a single IPv4 datagram
/// (65 535 minus the 20 byte IPv4 header).
pub const MAX_PING_LENGTH:      usize = 65_515;

/// Largest legal echo payload (`MAX_PING_LENGTH` minus the 8 byte ICMP header).
pub const MAX_PING_PAYLOAD:     usize = 65_507;

// ── EtherTypes ───────────────────────────────────────────────────────────────

pub const ETHERTYPE_IPV4:       u16 = 0x0800;
pub const ETHERTYPE_ARP:        u16 = 0x0806;
pub const ETHERTYPE_IPV6:       u16 = 0x86DD;

// ── IP protocol numbers ──────────────────────────────────────────────────────

pub const IP_PROTO_ICMP:        u8 = 1;
pub const IP_PROTO_TCP:         u8 = 6;
pub const IP_PROTO_UDP:         u8 = 17;
pub const IP_PROTO_ICMPV6:      u8 = 58;
