//! Blocking collectives over an established mesh
//!
//! Every rank must enter the same primitive in the same order. Buffers are
//! host-resident; callers stage tensors in and out.

use crate::element::{decode, encode, Element};
use crate::mesh::{MeshContext, PeerLink};
use mosaic_types::{MosaicError, OpKind, ReduceOp, Result};
use std::ops::Range;
use std::time::Instant;
use tracing::debug;

fn chunk_range(chunk: usize, chunk_size: usize, len: usize) -> Range<usize> {
    let start = (chunk * chunk_size).min(len);
    let end = (start + chunk_size).min(len);
    start..end
}

/// Send to one peer on a scoped thread while receiving from another, so a
/// large payload cannot stall on full socket buffers in both directions.
fn exchange(send_to: &PeerLink, payload: &[u8], recv_from: &PeerLink) -> Result<Vec<u8>> {
    std::thread::scope(|scope| {
        let sender = scope.spawn(|| send_to.send(payload));
        let received = recv_from.recv();
        let sent = sender
            .join()
            .map_err(|_| MosaicError::internal("ring sender thread panicked"))?;
        sent?;
        received
    })
}

impl MeshContext {
    /// Replicate `root`'s buffer into every rank's buffer
    pub fn broadcast_one_to_all<T: Element>(&self, buffer: &mut [T], root: usize) -> Result<()> {
        if root >= self.world_size() {
            return Err(MosaicError::shape_mismatch(
                OpKind::Broadcast,
                format!("root {} out of range for world size {}", root, self.world_size()),
            ));
        }
        let start = Instant::now();
        let bytes = (buffer.len() * T::SIZE) as u64;

        if self.world_size() > 1 {
            if self.rank() == root {
                let payload = encode(buffer);
                for peer in (0..self.world_size()).filter(|&p| p != root) {
                    self.peer(peer)?.send(&payload)?;
                }
            } else {
                let received: Vec<T> = decode(&self.peer(root)?.recv()?)?;
                if received.len() != buffer.len() {
                    return Err(MosaicError::shape_mismatch(
                        OpKind::Broadcast,
                        format!(
                            "root sent {} elements, local buffer holds {}",
                            received.len(),
                            buffer.len()
                        ),
                    ));
                }
                buffer.copy_from_slice(&received);
            }
        }

        self.stats()
            .record("broadcast_one_to_all", start.elapsed(), bytes);
        debug!(
            "broadcast_one_to_all: rank {} root {} {} x {}",
            self.rank(),
            root,
            buffer.len(),
            T::DTYPE
        );
        Ok(())
    }

    /// Ring reduce-scatter followed by ring all-gather; every rank ends with
    /// the same reduced buffer.
    pub fn allreduce_ring<T: Element>(&self, buffer: &mut [T], op: ReduceOp) -> Result<()> {
        let n = self.world_size();
        let start = Instant::now();
        let bytes = (buffer.len() * T::SIZE) as u64;

        if n > 1 && !buffer.is_empty() {
            let len = buffer.len();
            let chunk_size = len.div_ceil(n);
            let right = self.peer(self.right())?;
            let left = self.peer(self.left())?;

            // Reduce-scatter: after n-1 steps rank r owns chunk (r + 1) % n
            for step in 0..n - 1 {
                let send_chunk = (self.rank() + n - step) % n;
                let recv_chunk = (self.rank() + n - step - 1) % n;
                let payload = encode(&buffer[chunk_range(send_chunk, chunk_size, len)]);
                let incoming: Vec<T> = decode(&exchange(right, &payload, left)?)?;

                let target = &mut buffer[chunk_range(recv_chunk, chunk_size, len)];
                if incoming.len() != target.len() {
                    return Err(MosaicError::shape_mismatch(
                        OpKind::Allreduce,
                        format!(
                            "ring peer sent {} elements for a chunk of {}",
                            incoming.len(),
                            target.len()
                        ),
                    ));
                }
                for (dst, src) in target.iter_mut().zip(incoming) {
                    *dst = dst.combine(src, op);
                }
            }

            // All-gather: circulate the owned chunks
            for step in 0..n - 1 {
                let send_chunk = (self.rank() + 1 + n - step) % n;
                let recv_chunk = (self.rank() + n - step) % n;
                let payload = encode(&buffer[chunk_range(send_chunk, chunk_size, len)]);
                let incoming: Vec<T> = decode(&exchange(right, &payload, left)?)?;

                let target = &mut buffer[chunk_range(recv_chunk, chunk_size, len)];
                if incoming.len() != target.len() {
                    return Err(MosaicError::shape_mismatch(
                        OpKind::Allreduce,
                        format!(
                            "ring peer sent {} elements for a chunk of {}",
                            incoming.len(),
                            target.len()
                        ),
                    ));
                }
                target.copy_from_slice(&incoming);
            }
        }

        if op == ReduceOp::Avg && n > 1 {
            for value in buffer.iter_mut() {
                *value = T::from_f64(value.to_f64() / n as f64);
            }
        }

        self.stats().record("allreduce_ring", start.elapsed(), bytes);
        debug!(
            "allreduce_ring: rank {} op {} {} x {}",
            self.rank(),
            op,
            buffer.len(),
            T::DTYPE
        );
        Ok(())
    }
}
