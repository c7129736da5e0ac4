use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{DiscardCause, MultiPacketError};
use crate::record::Outcome;

/// Largest payload a fast packet sequence can carry (6 + 31 * 7 bytes).
pub const MAX_PAYLOAD: usize = 223;

/// Data bytes of one CAN frame.
pub const FRAME_LEN: usize = 8;

/// Identifies one reassembly session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub source: u8,
    pub sequence: u8,
    pub pgn: u32,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pgn {} from {} (seq {})", self.pgn, self.source, self.sequence)
    }
}

/// One physical frame of a fast packet sequence.
///
/// Byte 0 carries the sequence counter (upper 3 bits) and the frame index
/// (lower 5 bits). Frame 0 follows with the total payload length and 6 data
/// bytes; later frames carry 7 data bytes each.
#[derive(Debug, Clone, Copy)]
pub struct FastPacketFrame<'a> {
    pub source: u8,
    pub pgn: u32,
    pub data: &'a [u8],
}

impl FastPacketFrame<'_> {
    pub fn sequence(&self) -> Option<u8> {
        self.data.first().map(|b| b >> 5)
    }

    pub fn index(&self) -> Option<u8> {
        self.data.first().map(|b| b & 0x1F)
    }
}

/// Number of frames needed for a payload of `total_len` bytes.
pub fn expected_frames(total_len: usize) -> usize {
    if total_len <= 6 {
        1
    } else {
        1 + (total_len - 6).div_ceil(7)
    }
}

/// Reassembly result of a single pushed frame.
pub type Assembly = Outcome<Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReassemblyPolicy {
    /// Keep continuation frames that arrive before their start frame and let
    /// the start frame adopt them. When off, such frames are orphans.
    pub park_out_of_order: bool,
}

/// Snapshot of an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub key: SessionKey,
    pub received: usize,
    /// Highest index such that frames 0 through it are all buffered.
    pub highest_contiguous: usize,
    pub expected_frames: usize,
    pub total_len: usize,
    pub created_at: Instant,
    pub serial: u64,
}

struct Session {
    frames: Vec<Option<Vec<u8>>>,
    received: usize,
    total_len: usize,
    created_at: Instant,
    serial: u64,
}

impl Session {
    fn is_complete(&self) -> bool {
        self.received == self.frames.len()
    }

    fn highest_contiguous(&self) -> usize {
        self.frames
            .iter()
            .take_while(|f| f.is_some())
            .count()
            .saturating_sub(1)
    }

    fn payload(&self) -> Vec<u8> {
        let mut data: Vec<u8> = self.frames.iter().flatten().flatten().copied().collect();
        data.truncate(self.total_len);
        data
    }
}

struct Parked {
    data: Vec<u8>,
    at: Instant,
}

#[derive(Default)]
struct TableState {
    sessions: HashMap<SessionKey, Session>,
    parked: HashMap<SessionKey, BTreeMap<u8, Parked>>,
    notices: HashMap<SessionKey, (DiscardCause, Instant)>,
    next_serial: u64,
}

/// All open reassembly sessions of one decoder.
///
/// Owned by the caller and handed to a [`Reassembler`]; nothing here is
/// global. A single mutex guards the whole table.
#[derive(Default)]
pub struct SessionTable {
    state: Mutex<TableState>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    /// Open sessions, oldest first.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let state = self.lock();
        let mut sessions: Vec<SessionInfo> = state
            .sessions
            .iter()
            .map(|(key, s)| SessionInfo {
                key: *key,
                received: s.received,
                highest_contiguous: s.highest_contiguous(),
                expected_frames: s.frames.len(),
                total_len: s.total_len,
                created_at: s.created_at,
                serial: s.serial,
            })
            .collect();
        sessions.sort_by_key(|s| s.serial);
        sessions
    }

    /// Takes every pending discard notice, oldest first. A notice taken here
    /// is no longer reported by [`Reassembler::query`].
    pub fn drain_notices(&self) -> Vec<MultiPacketError> {
        let mut state = self.lock();
        let mut notices: Vec<(Instant, SessionKey, DiscardCause)> = state
            .notices
            .drain()
            .map(|(key, (cause, at))| (at, key, cause))
            .collect();
        notices.sort_by_key(|(at, key, _)| (*at, *key));
        notices
            .into_iter()
            .map(|(_, key, cause)| MultiPacketError::Discarded { key, cause })
            .collect()
    }

    /// Evicts sessions created more than `max_age` before `now` and reports
    /// each one as discarded. Parked frames and pending notices of the same
    /// age are dropped silently.
    pub fn evict_stale(&self, now: Instant, max_age: Duration) -> Vec<MultiPacketError> {
        let Some(cutoff) = now.checked_sub(max_age) else {
            return Vec::new();
        };
        let mut state = self.lock();

        let mut stale: Vec<(u64, SessionKey)> = state
            .sessions
            .iter()
            .filter(|(_, s)| s.created_at < cutoff)
            .map(|(key, s)| (s.serial, *key))
            .collect();
        stale.sort();
        for (_, key) in &stale {
            state.sessions.remove(key);
            debug!("Evicted stale fast packet session: {}", key);
        }

        state.parked.retain(|_, frames| {
            frames.retain(|_, p| p.at >= cutoff);
            !frames.is_empty()
        });
        state.notices.retain(|_, (_, at)| *at >= cutoff);

        stale
            .into_iter()
            .map(|(_, key)| MultiPacketError::Discarded {
                key,
                cause: DiscardCause::Stale,
            })
            .collect()
    }
}

/// Fast packet reassembly over a caller-owned [`SessionTable`].
pub struct Reassembler {
    table: Arc<SessionTable>,
    policy: ReassemblyPolicy,
}

impl Reassembler {
    pub fn new(table: Arc<SessionTable>) -> Self {
        Self {
            table,
            policy: ReassemblyPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReassemblyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ReassemblyPolicy {
        self.policy
    }

    pub fn table(&self) -> &Arc<SessionTable> {
        &self.table
    }

    /// Feeds one frame. `now` is the caller's clock and becomes the creation
    /// marker of any session opened by this frame.
    pub fn push(&self, frame: &FastPacketFrame<'_>, now: Instant) -> Result<Assembly, MultiPacketError> {
        let Some(&header) = frame.data.first() else {
            return Err(MultiPacketError::EmptyFrame {
                pgn: frame.pgn,
                source_address: frame.source,
            });
        };
        let index = header & 0x1F;
        let key = SessionKey {
            source: frame.source,
            sequence: header >> 5,
            pgn: frame.pgn,
        };
        if frame.data.len() > FRAME_LEN {
            return Err(MultiPacketError::InvalidLength {
                key,
                length: frame.data.len(),
            });
        }

        let mut state = self.table.lock();
        if index == 0 {
            self.start(&mut state, key, frame.data, now)
        } else {
            self.continuation(&mut state, key, index, &frame.data[1..], now)
        }
    }

    fn start(
        &self,
        state: &mut TableState,
        key: SessionKey,
        data: &[u8],
        now: Instant,
    ) -> Result<Assembly, MultiPacketError> {
        let Some(&length) = data.get(1) else {
            return Err(MultiPacketError::InvalidLength {
                key,
                length: data.len(),
            });
        };
        let total_len = length as usize;
        if total_len == 0 || total_len > MAX_PAYLOAD {
            return Err(MultiPacketError::InvalidLength { key, length: total_len });
        }

        if state.sessions.remove(&key).is_some() {
            debug!("Fast packet restarted: {}", key);
            state.notices.insert(key, (DiscardCause::Restarted, now));
        }

        let serial = state.next_serial;
        state.next_serial += 1;
        let mut frames = vec![None; expected_frames(total_len)];
        frames[0] = Some(data[2..].to_vec());
        let mut session = Session {
            frames,
            received: 1,
            total_len,
            created_at: now,
            serial,
        };

        if let Some(parked) = state.parked.remove(&key) {
            for (index, p) in parked {
                match session.frames.get_mut(index as usize) {
                    Some(slot) => {
                        *slot = Some(p.data);
                        session.received += 1;
                    }
                    None => debug!("Dropped parked frame {} beyond {}", index, key),
                }
            }
        }

        if session.is_complete() {
            return finish(key, &session);
        }
        debug!(
            "Fast packet opened: {} ({} bytes, {} frames)",
            key,
            total_len,
            session.frames.len()
        );
        state.sessions.insert(key, session);
        Ok(Outcome::Pending)
    }

    fn continuation(
        &self,
        state: &mut TableState,
        key: SessionKey,
        index: u8,
        chunk: &[u8],
        now: Instant,
    ) -> Result<Assembly, MultiPacketError> {
        let Some(session) = state.sessions.get_mut(&key) else {
            if self.policy.park_out_of_order {
                let parked = state.parked.entry(key).or_default();
                if let Some(existing) = parked.get(&index) {
                    if existing.data == chunk {
                        return Ok(Outcome::Pending);
                    }
                    return Err(MultiPacketError::Conflict { key, index });
                }
                debug!("Parked frame {} for {}", index, key);
                parked.insert(
                    index,
                    Parked {
                        data: chunk.to_vec(),
                        at: now,
                    },
                );
                return Ok(Outcome::Pending);
            }
            debug!("Orphan frame {} for {}", index, key);
            return Err(MultiPacketError::Orphan { key, index });
        };

        let expected = session.frames.len();
        let Some(slot) = session.frames.get_mut(index as usize) else {
            return Err(MultiPacketError::OutOfRange {
                key,
                index,
                expected_frames: expected,
            });
        };
        if let Some(existing) = slot.as_deref() {
            if existing == chunk {
                return Ok(Outcome::Pending);
            }
            return Err(MultiPacketError::Conflict { key, index });
        }
        *slot = Some(chunk.to_vec());
        session.received += 1;

        if !session.is_complete() {
            return Ok(Outcome::Pending);
        }
        match state.sessions.remove(&key) {
            Some(session) => finish(key, &session),
            None => Ok(Outcome::Pending),
        }
    }

    /// Reports the state of `key`: a pending discard notice (once), an open
    /// session, or nothing.
    pub fn query(&self, key: &SessionKey) -> Result<(), MultiPacketError> {
        let mut state = self.table.lock();
        if let Some((cause, _)) = state.notices.remove(key) {
            return Err(MultiPacketError::Discarded { key: *key, cause });
        }
        if let Some(session) = state.sessions.get(key) {
            return Err(MultiPacketError::InProcess {
                key: *key,
                received: session.received,
                expected_frames: session.frames.len(),
            });
        }
        if let Some(parked) = state.parked.get(key) {
            return Err(MultiPacketError::InProcess {
                key: *key,
                received: parked.len(),
                expected_frames: 0,
            });
        }
        Ok(())
    }

    /// Drops the session for `key`, if any.
    pub fn discard(&self, key: &SessionKey) -> Result<(), MultiPacketError> {
        let mut state = self.table.lock();
        let open = state.sessions.remove(key).is_some();
        let parked = state.parked.remove(key).is_some();
        if open || parked {
            debug!("Discarded fast packet session: {}", key);
            return Err(MultiPacketError::Discarded {
                key: *key,
                cause: DiscardCause::Explicit,
            });
        }
        Ok(())
    }

    /// Drops every session of one source address, e.g. after it left the bus.
    pub fn discard_source(&self, source: u8) -> Vec<MultiPacketError> {
        let mut state = self.table.lock();
        let mut keys: Vec<SessionKey> = state
            .sessions
            .keys()
            .filter(|k| k.source == source)
            .copied()
            .collect();
        keys.sort();
        state.parked.retain(|k, _| k.source != source);
        keys.into_iter()
            .filter_map(|key| state.sessions.remove(&key).map(|_| key))
            .map(|key| MultiPacketError::Discarded {
                key,
                cause: DiscardCause::Explicit,
            })
            .collect()
    }

    pub fn evict_stale(&self, now: Instant, max_age: Duration) -> Vec<MultiPacketError> {
        self.table.evict_stale(now, max_age)
    }
}

fn finish(key: SessionKey, session: &Session) -> Result<Assembly, MultiPacketError> {
    let payload = session.payload();
    if payload.len() < session.total_len {
        return Err(MultiPacketError::InvalidLength {
            key,
            length: payload.len(),
        });
    }
    debug!("Fast packet complete: {} ({} bytes)", key, payload.len());
    Ok(Outcome::Complete(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PGN: u32 = 129029;

    fn frame(sequence: u8, index: u8, bytes: &[u8]) -> Vec<u8> {
        let mut data = vec![(sequence << 5) | index];
        data.extend_from_slice(bytes);
        data
    }

    fn push(r: &Reassembler, source: u8, data: &[u8], now: Instant) -> Result<Assembly, MultiPacketError> {
        r.push(&FastPacketFrame { source, pgn: PGN, data }, now)
    }

    fn key(source: u8, sequence: u8) -> SessionKey {
        SessionKey {
            source,
            sequence,
            pgn: PGN,
        }
    }

    fn reassembler() -> Reassembler {
        Reassembler::new(Arc::new(SessionTable::new()))
    }

    fn parking() -> Reassembler {
        reassembler().with_policy(ReassemblyPolicy {
            park_out_of_order: true,
        })
    }

    #[test]
    fn test_expected_frames() {
        assert_eq!(expected_frames(1), 1);
        assert_eq!(expected_frames(6), 1);
        assert_eq!(expected_frames(7), 2);
        assert_eq!(expected_frames(13), 2);
        assert_eq!(expected_frames(14), 3);
        assert_eq!(expected_frames(MAX_PAYLOAD), 32);
    }

    #[test]
    fn test_single_frame_sequence_completes_immediately() {
        let r = reassembler();
        let now = Instant::now();
        let result = push(&r, 1, &frame(0, 0, &[4, 0xA, 0xB, 0xC, 0xD, 0xFF, 0xFF]), now).unwrap();
        assert_eq!(result, Outcome::Complete(vec![0xA, 0xB, 0xC, 0xD]));
        assert!(r.table().is_empty());
    }

    #[test]
    fn test_in_order_assembly() {
        let r = reassembler();
        let now = Instant::now();
        let payload: Vec<u8> = (1..=20).collect();
        let f0 = frame(2, 0, &[20, 1, 2, 3, 4, 5, 6]);
        let f1 = frame(2, 1, &payload[6..13]);
        let f2 = frame(2, 2, &[14, 15, 16, 17, 18, 19, 20]);
        assert!(push(&r, 7, &f0, now).unwrap().is_pending());
        assert!(push(&r, 7, &f1, now).unwrap().is_pending());
        assert_eq!(
            r.query(&key(7, 2)),
            Err(MultiPacketError::InProcess {
                key: key(7, 2),
                received: 2,
                expected_frames: 3
            })
        );
        assert_eq!(push(&r, 7, &f2, now).unwrap(), Outcome::Complete(payload));
        assert!(r.table().is_empty());
        assert_eq!(r.query(&key(7, 2)), Ok(()));
    }

    #[test]
    fn test_orphan_creates_no_session() {
        let r = reassembler();
        let err = push(&r, 3, &frame(1, 1, &[0; 7]), Instant::now()).unwrap_err();
        assert_eq!(err, MultiPacketError::Orphan { key: key(3, 1), index: 1 });
        assert!(r.table().is_empty());
        assert_eq!(r.query(&key(3, 1)), Ok(()));
    }

    #[test]
    fn test_parked_frame_adopted_by_start() {
        let r = parking();
        let now = Instant::now();
        let f1 = frame(0, 1, &[7, 8, 9, 10, 0xFF, 0xFF, 0xFF]);
        assert!(push(&r, 9, &f1, now).unwrap().is_pending());
        assert!(r.table().is_empty());
        assert!(r.query(&key(9, 0)).unwrap_err().is_pending());

        let f0 = frame(0, 0, &[10, 1, 2, 3, 4, 5, 6]);
        assert_eq!(
            push(&r, 9, &f0, now).unwrap(),
            Outcome::Complete(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10])
        );
        assert_eq!(r.query(&key(9, 0)), Ok(()));
    }

    #[test]
    fn test_parked_copies_must_agree() {
        let r = parking();
        let now = Instant::now();
        let f1 = frame(0, 1, &[7, 8, 9, 10, 0xFF, 0xFF, 0xFF]);
        assert!(push(&r, 9, &f1, now).unwrap().is_pending());
        assert!(push(&r, 9, &f1, now).unwrap().is_pending());
        assert_eq!(
            push(&r, 9, &frame(0, 1, &[0; 7]), now),
            Err(MultiPacketError::Conflict { key: key(9, 0), index: 1 })
        );

        // the first copy is the one adopted
        let f0 = frame(0, 0, &[10, 1, 2, 3, 4, 5, 6]);
        assert_eq!(
            push(&r, 9, &f0, now).unwrap(),
            Outcome::Complete(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10])
        );
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let r = reassembler();
        let now = Instant::now();
        push(&r, 4, &frame(0, 0, &[20, 1, 2, 3, 4, 5, 6]), now).unwrap();
        assert_eq!(
            push(&r, 4, &frame(0, 1, &[7, 8, 9, 10, 11, 12, 13, 14, 15, 16]), now),
            Err(MultiPacketError::InvalidLength { key: key(4, 0), length: 11 })
        );
        assert_eq!(r.table().sessions()[0].received, 1);
        assert!(matches!(
            push(&r, 5, &frame(0, 0, &[20, 1, 2, 3, 4, 5, 6, 7]), now),
            Err(MultiPacketError::InvalidLength { length: 9, .. })
        ));
        assert_eq!(r.table().len(), 1);
    }

    #[test]
    fn test_out_of_order_within_session() {
        let r = reassembler();
        let now = Instant::now();
        push(&r, 1, &frame(0, 0, &[20, 1, 2, 3, 4, 5, 6]), now).unwrap();
        assert!(push(&r, 1, &frame(0, 2, &[14, 15, 16, 17, 18, 19, 20]), now).unwrap().is_pending());
        let info = &r.table().sessions()[0];
        assert_eq!(info.received, 2);
        assert_eq!(info.highest_contiguous, 0);
        let done = push(&r, 1, &frame(0, 1, &[7, 8, 9, 10, 11, 12, 13]), now).unwrap();
        assert_eq!(done, Outcome::Complete((1..=20).collect()));
    }

    #[test]
    fn test_restart_discards_old_session() {
        let r = reassembler();
        let now = Instant::now();
        push(&r, 5, &frame(4, 0, &[20, 1, 2, 3, 4, 5, 6]), now).unwrap();
        push(&r, 5, &frame(4, 1, &[7, 8, 9, 10, 11, 12, 13]), now).unwrap();
        push(&r, 5, &frame(4, 0, &[20, 9, 9, 9, 9, 9, 9]), now).unwrap();

        assert_eq!(
            r.query(&key(5, 4)),
            Err(MultiPacketError::Discarded {
                key: key(5, 4),
                cause: DiscardCause::Restarted
            })
        );
        // Reported once; the fresh session is what remains.
        let pending = r.query(&key(5, 4)).unwrap_err();
        assert_eq!(
            pending,
            MultiPacketError::InProcess {
                key: key(5, 4),
                received: 1,
                expected_frames: 3
            }
        );
        assert_eq!(r.table().len(), 1);
    }

    #[test]
    fn test_drain_notices_reports_restart_once() {
        let r = reassembler();
        let now = Instant::now();
        push(&r, 5, &frame(4, 0, &[20, 1, 2, 3, 4, 5, 6]), now).unwrap();
        push(&r, 5, &frame(4, 0, &[20, 9, 9, 9, 9, 9, 9]), now).unwrap();

        assert_eq!(
            r.table().drain_notices(),
            vec![MultiPacketError::Discarded {
                key: key(5, 4),
                cause: DiscardCause::Restarted
            }]
        );
        assert!(r.table().drain_notices().is_empty());
        assert!(r.query(&key(5, 4)).unwrap_err().is_pending());
    }

    #[test]
    fn test_conflict_and_identical_redelivery() {
        let r = reassembler();
        let now = Instant::now();
        push(&r, 2, &frame(0, 0, &[20, 1, 2, 3, 4, 5, 6]), now).unwrap();
        let f1 = frame(0, 1, &[7, 8, 9, 10, 11, 12, 13]);
        push(&r, 2, &f1, now).unwrap();
        assert!(push(&r, 2, &f1, now).unwrap().is_pending());

        let err = push(&r, 2, &frame(0, 1, &[0; 7]), now).unwrap_err();
        assert_eq!(err, MultiPacketError::Conflict { key: key(2, 0), index: 1 });
        let info = &r.table().sessions()[0];
        assert_eq!(info.received, 2);
    }

    #[test]
    fn test_index_beyond_frame_count() {
        let r = reassembler();
        let now = Instant::now();
        push(&r, 2, &frame(0, 0, &[10, 1, 2, 3, 4, 5, 6]), now).unwrap();
        let err = push(&r, 2, &frame(0, 2, &[0; 7]), now).unwrap_err();
        assert_eq!(
            err,
            MultiPacketError::OutOfRange {
                key: key(2, 0),
                index: 2,
                expected_frames: 2
            }
        );
        assert_eq!(r.table().sessions()[0].received, 1);
    }

    #[test]
    fn test_invalid_length_and_empty_frame() {
        let r = reassembler();
        let now = Instant::now();
        assert!(matches!(
            push(&r, 1, &frame(0, 0, &[0, 1, 2]), now),
            Err(MultiPacketError::InvalidLength { length: 0, .. })
        ));
        assert!(matches!(
            push(&r, 1, &frame(0, 0, &[224, 1, 2]), now),
            Err(MultiPacketError::InvalidLength { length: 224, .. })
        ));
        assert!(matches!(
            push(&r, 1, &[0x00], now),
            Err(MultiPacketError::InvalidLength { length: 1, .. })
        ));
        assert_eq!(
            push(&r, 1, &[], now),
            Err(MultiPacketError::EmptyFrame {
                pgn: PGN,
                source_address: 1
            })
        );
    }

    #[test]
    fn test_short_final_frame_is_invalid() {
        let r = reassembler();
        let now = Instant::now();
        push(&r, 1, &frame(0, 0, &[10, 1, 2, 3, 4, 5, 6]), now).unwrap();
        let err = push(&r, 1, &frame(0, 1, &[7, 8]), now).unwrap_err();
        assert_eq!(err, MultiPacketError::InvalidLength { key: key(1, 0), length: 8 });
    }

    #[test]
    fn test_explicit_discard() {
        let r = reassembler();
        push(&r, 8, &frame(3, 0, &[20, 1, 2, 3, 4, 5, 6]), Instant::now()).unwrap();
        assert_eq!(
            r.discard(&key(8, 3)),
            Err(MultiPacketError::Discarded {
                key: key(8, 3),
                cause: DiscardCause::Explicit
            })
        );
        assert_eq!(r.discard(&key(8, 3)), Ok(()));
        assert!(r.table().is_empty());
    }

    #[test]
    fn test_discard_source() {
        let r = reassembler();
        let now = Instant::now();
        push(&r, 8, &frame(3, 0, &[20, 1, 2, 3, 4, 5, 6]), now).unwrap();
        push(&r, 8, &frame(4, 0, &[20, 1, 2, 3, 4, 5, 6]), now).unwrap();
        push(&r, 9, &frame(3, 0, &[20, 1, 2, 3, 4, 5, 6]), now).unwrap();
        let dropped = r.discard_source(8);
        assert_eq!(dropped.len(), 2);
        assert!(dropped.iter().all(MultiPacketError::is_discarded));
        assert_eq!(r.table().sessions()[0].key, key(9, 3));
    }

    #[test]
    fn test_interleaved_sources() {
        let r = reassembler();
        let now = Instant::now();
        push(&r, 1, &frame(0, 0, &[10, 1, 1, 1, 1, 1, 1]), now).unwrap();
        push(&r, 2, &frame(0, 0, &[10, 2, 2, 2, 2, 2, 2]), now).unwrap();
        let two = push(&r, 2, &frame(0, 1, &[2, 2, 2, 2, 0xFF, 0xFF, 0xFF]), now).unwrap();
        let one = push(&r, 1, &frame(0, 1, &[1, 1, 1, 1, 0xFF, 0xFF, 0xFF]), now).unwrap();
        assert_eq!(two, Outcome::Complete(vec![2; 10]));
        assert_eq!(one, Outcome::Complete(vec![1; 10]));
    }

    #[test]
    fn test_evict_stale() {
        let r = reassembler();
        let start = Instant::now();
        push(&r, 1, &frame(0, 0, &[20, 1, 2, 3, 4, 5, 6]), start).unwrap();
        let later = start + Duration::from_millis(800);
        push(&r, 2, &frame(0, 0, &[20, 1, 2, 3, 4, 5, 6]), later).unwrap();

        let evicted = r.evict_stale(start + Duration::from_millis(1000), Duration::from_millis(500));
        assert_eq!(
            evicted,
            vec![MultiPacketError::Discarded {
                key: key(1, 0),
                cause: DiscardCause::Stale
            }]
        );
        assert_eq!(r.table().len(), 1);
        assert!(r.evict_stale(later, Duration::from_millis(500)).is_empty());
    }

    #[test]
    fn test_shared_table_across_reassemblers() {
        let table = Arc::new(SessionTable::new());
        let a = Reassembler::new(Arc::clone(&table));
        let b = Reassembler::new(Arc::clone(&table));
        let now = Instant::now();
        push(&a, 1, &frame(0, 0, &[10, 1, 2, 3, 4, 5, 6]), now).unwrap();
        let done = push(&b, 1, &frame(0, 1, &[7, 8, 9, 10, 0, 0, 0]), now).unwrap();
        assert_eq!(done, Outcome::Complete((1..=10).collect()));
    }
}
