//! Cross-rank particle hand-off and collectives
//!
//! Ranks never share memory. Everything they agree on goes through
//! [`Communicator::all_gather`], which every rank must call the same number of
//! times in the same order, even with an empty payload.
//!
//! Particles travel as fixed-size little-endian records of [`RECORD_SIZE`]
//! bytes:
//!
//! | offset | field |
//! |-------:|-------|
//! | 0   | x, y, z, t (`f64` x4) |
//! | 32  | cached cell T0: cell id `i64`, dataset `u32` |
//! | 44  | cached cell T1: cell id `i64`, dataset `u32` |
//! | 56  | location, source id, step age, injected point id, injected step id, error code (`i32` x6) |
//! | 80  | unique id `i64` |
//! | 88  | simulation time, age, rotation, angular velocity, rotation time, speed (`f64` x6) |
//! | 136 | output point id `i64` (-1 when never emitted) |

use crate::core_types::{CellHint, ErrorCode, LocationState, ParticlePosition, ParticleRecord, TraceError};
use std::sync::{Arc, Barrier, Mutex, PoisonError};

/// Size in bytes of one encoded particle
pub const RECORD_SIZE: usize = 144;

/// Collective operations between cooperating ranks
pub trait Communicator: Send {
    /// This rank's index in `0..size()`
    fn rank(&self) -> usize;

    /// Number of cooperating ranks
    fn size(&self) -> usize;

    /// Contribute `payload` and receive every rank's payload in rank order
    ///
    /// Blocks until all ranks have contributed.
    fn all_gather(&self, payload: Vec<u8>) -> Vec<Vec<u8>>;

    /// Gather one count from every rank
    fn all_gather_counts(&self, count: usize) -> Vec<usize> {
        self.all_gather((count as u64).to_le_bytes().to_vec())
            .iter()
            .map(|bytes| <[u8; 8]>::try_from(bytes.as_slice()).map_or(0, u64::from_le_bytes) as usize)
            .collect()
    }

    /// Sum of `value` over every rank
    fn all_reduce_sum(&self, value: u64) -> u64 {
        self.all_gather_counts(value as usize)
            .into_iter()
            .map(|c| c as u64)
            .sum()
    }
}

/// The single-rank communicator
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCommunicator;

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather(&self, payload: Vec<u8>) -> Vec<Vec<u8>> {
        vec![payload]
    }
}

#[derive(Debug)]
struct GroupState {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<u8>>>,
}

/// Simulated ranks running as threads of one process
///
/// Each rank owns one [`InProcessCommunicator`] and must run on its own
/// thread, otherwise the first collective blocks forever.
#[derive(Debug)]
pub struct InProcessGroup;

impl InProcessGroup {
    /// One communicator per rank, in rank order
    pub fn create(size: usize) -> Vec<InProcessCommunicator> {
        let state = Arc::new(GroupState {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| InProcessCommunicator {
                rank,
                size,
                state: Arc::clone(&state),
            })
            .collect()
    }
}

/// A rank of an [`InProcessGroup`]
#[derive(Debug, Clone)]
pub struct InProcessCommunicator {
    rank: usize,
    size: usize,
    state: Arc<GroupState>,
}

impl Communicator for InProcessCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather(&self, payload: Vec<u8>) -> Vec<Vec<u8>> {
        {
            let mut slots = self
                .state
                .slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            slots[self.rank] = payload;
        }
        self.state.barrier.wait();
        let gathered = self
            .state
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        // Nobody may overwrite a slot until every rank has read the round
        self.state.barrier.wait();
        gathered
    }
}

/// Encode particles as consecutive fixed-size records
pub fn encode_particles(particles: &[ParticleRecord]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(particles.len() * RECORD_SIZE);
    for p in particles {
        for v in p.position.to_array() {
            buffer.extend_from_slice(&v.to_le_bytes());
        }
        for hint in p.cached_cells {
            let (cell_id, dataset_index) = CellHint::to_raw(hint);
            buffer.extend_from_slice(&cell_id.to_le_bytes());
            buffer.extend_from_slice(&(dataset_index as u32).to_le_bytes());
        }
        for v in [
            p.location.as_i32(),
            p.source_id,
            p.time_step_age,
            p.injected_point_id,
            p.injected_step_id,
            p.error_code.as_i32(),
        ] {
            buffer.extend_from_slice(&v.to_le_bytes());
        }
        buffer.extend_from_slice(&p.unique_id.to_le_bytes());
        for v in [
            p.simulation_time,
            p.age,
            p.rotation,
            p.angular_velocity,
            p.rotation_time,
            p.speed,
        ] {
            buffer.extend_from_slice(&v.to_le_bytes());
        }
        let point_id = p.point_id.map_or(-1, |id| id as i64);
        buffer.extend_from_slice(&point_id.to_le_bytes());
    }
    buffer
}

/// Decode records produced by [`encode_particles`]
///
/// # Errors
/// Returns `CorruptRecord` if the buffer is not a whole number of records or a
/// record holds an unknown location state or error code.
pub fn decode_particles(bytes: &[u8]) -> Result<Vec<ParticleRecord>, TraceError> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(TraceError::CorruptRecord(format!(
            "buffer of {} bytes is not a multiple of {}",
            bytes.len(),
            RECORD_SIZE
        )));
    }
    bytes
        .chunks_exact(RECORD_SIZE)
        .map(|chunk| RecordReader::new(chunk).particle())
        .collect()
}

struct RecordReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> RecordReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.offset..self.offset + N]);
        self.offset += N;
        out
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take())
    }

    fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn particle(mut self) -> Result<ParticleRecord, TraceError> {
        let position = ParticlePosition::from([self.f64(), self.f64(), self.f64(), self.f64()]);
        let mut cached_cells = [None, None];
        for hint in &mut cached_cells {
            let cell_id = self.i64();
            let dataset_index = self.u32() as usize;
            *hint = CellHint::from_raw(cell_id, dataset_index);
        }
        let raw_location = self.i32();
        let location = LocationState::from_i32(raw_location).ok_or_else(|| {
            TraceError::CorruptRecord(format!("unknown location state {raw_location}"))
        })?;
        let source_id = self.i32();
        let time_step_age = self.i32();
        let injected_point_id = self.i32();
        let injected_step_id = self.i32();
        let raw_code = self.i32();
        let error_code = ErrorCode::from_i32(raw_code)
            .ok_or_else(|| TraceError::CorruptRecord(format!("unknown error code {raw_code}")))?;
        let unique_id = self.i64();
        let simulation_time = self.f64();
        let age = self.f64();
        let rotation = self.f64();
        let angular_velocity = self.f64();
        let rotation_time = self.f64();
        let speed = self.f64();
        let point_id = usize::try_from(self.i64()).ok();

        Ok(ParticleRecord {
            position,
            cached_cells,
            location,
            source_id,
            time_step_age,
            injected_point_id,
            injected_step_id,
            unique_id,
            simulation_time,
            error_code,
            age,
            rotation,
            angular_velocity,
            rotation_time,
            speed,
            point_id,
        })
    }
}

/// Send `outbox` to every peer and collect what the peers sent
///
/// Each rank's own contribution is skipped on receipt, so on a single rank
/// this returns nothing.
///
/// # Errors
/// Returns `CorruptRecord` if a peer's payload does not decode.
pub fn exchange_particles<C: Communicator + ?Sized>(
    comm: &C,
    outbox: &[ParticleRecord],
) -> Result<Vec<ParticleRecord>, TraceError> {
    let payloads = comm.all_gather(encode_particles(outbox));
    let own = comm.rank();
    let mut received = Vec::new();
    for (rank, payload) in payloads.iter().enumerate() {
        if rank != own {
            received.extend(decode_particles(payload)?);
        }
    }
    Ok(received)
}

/// Give each particle a globally unique id
///
/// `counts[r]` is the number of particles rank `r` is labelling in this round.
/// Rank `r` takes the ids after those of all lower ranks, and the shared
/// counter advances by the total so later rounds never overlap.
pub fn assign_unique_ids(
    counter: &mut i64,
    particles: &mut [ParticleRecord],
    counts: &[usize],
    rank: usize,
) {
    let offset: usize = counts.iter().take(rank).sum();
    let total: usize = counts.iter().sum();
    for (i, p) in particles.iter_mut().enumerate() {
        p.unique_id = *counter + (offset + i) as i64;
    }
    *counter += total as i64;
}

/// Resolve seeds accepted by more than one rank
///
/// `accepted[i]` says whether this rank accepted candidate `i`. The result
/// keeps a candidate only if no lower rank accepted it as well.
pub fn lowest_rank_owners<C: Communicator + ?Sized>(comm: &C, accepted: &[bool]) -> Vec<bool> {
    let mask = accepted.iter().map(|&a| u8::from(a)).collect();
    let gathered = comm.all_gather(mask);
    let lower = &gathered[..comm.rank().min(gathered.len())];
    accepted
        .iter()
        .enumerate()
        .map(|(i, &mine)| mine && !lower.iter().any(|m| m.get(i).is_some_and(|&b| b != 0)))
        .collect()
}
