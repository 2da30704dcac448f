//! Byte-stream producer transport.
//!
//! Segments application buffers into content objects, signs them (each one
//! individually, or batched under signed manifests), parks them in the
//! bounded output buffer and serves interests from there. Production can
//! run synchronously on the caller or on a worker thread that posts
//! finished segments back to the serve loop; observers see the last
//! published suffix advance monotonically either way.

use crate::config::{ProducerCallbacks, ProducerConfig};
use crate::consumer::StopHandle;
use crate::error::TransportError;
use crate::manifest::Manifest;
use crate::name::{Name, Prefix};
use crate::output_buffer::OutputBuffer;
use crate::packet::{ContentObject, Interest};
use crate::portal::{PacketEvent, Portal};
use bytes::Bytes;
use hicn_auth::Signer;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll granularity of the serve loop.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Pre-allocated reply pool size in virtual mode.
const VIRTUAL_POOL_SIZE: usize = 256;

enum WorkerMessage {
    Segment(Box<ContentObject>),
    /// Production finished with the byte count, or failed.
    Done(Result<u64, TransportError>),
}

/// Byte-stream producer socket.
pub struct StreamProducer {
    config: ProducerConfig,
    callbacks: ProducerCallbacks,
    portal: Portal,
    output_buffer: OutputBuffer,
    last_published_suffix: Arc<AtomicU32>,
    worker_rx: Option<mpsc::Receiver<WorkerMessage>>,
    worker_handle: Option<std::thread::JoinHandle<()>>,
    virtual_pool: Vec<ContentObject>,
    virtual_index: usize,
}

impl StreamProducer {
    pub fn new(
        config: ProducerConfig,
        callbacks: ProducerCallbacks,
        portal: Portal,
    ) -> Result<Self, TransportError> {
        config.validate()?;

        let output_buffer = OutputBuffer::new(if config.virtual_mode {
            0
        } else {
            config.output_buffer_size
        });

        let virtual_pool = if config.virtual_mode {
            let filler = Bytes::from(vec![b'X'; config.max_segment_payload()]);
            let placeholder: Name = Prefix::new(
                crate::name::AddressFamily::V6,
                &[0u8; 16],
                128,
            )?
            .name(0);
            (0..VIRTUAL_POOL_SIZE)
                .map(|_| {
                    let mut content = ContentObject::new(placeholder, filler.clone());
                    content.set_expiry_ms(config.content_expiry_ms);
                    content
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(StreamProducer {
            config,
            callbacks,
            portal,
            output_buffer,
            last_published_suffix: Arc::new(AtomicU32::new(0)),
            worker_rx: None,
            worker_handle: None,
            virtual_pool,
            virtual_index: 0,
        })
    }

    /// Serve interests under `prefix`.
    pub fn register_prefix(&mut self, prefix: Prefix) {
        info!(%prefix, "producer prefix registered");
        self.portal.register_prefix(prefix);
    }

    /// Wire suffix of the most recently published content object.
    /// Advanced after each insert, so readers observe segments in
    /// publication order.
    pub fn last_published_suffix(&self) -> u32 {
        self.last_published_suffix.load(Ordering::Acquire)
    }

    pub fn output_buffer_len(&self) -> usize {
        self.output_buffer.len()
    }

    fn publish(&mut self, content: ContentObject) {
        let suffix = content.suffix();
        self.output_buffer.insert(content);
        self.last_published_suffix.store(suffix, Ordering::Release);
    }

    /// Segment `buffer` into content objects starting at `start_offset`,
    /// sign per configuration, and publish everything to the output
    /// buffer. Returns the number of data segments produced (manifests
    /// not counted).
    pub fn produce_stream(
        &mut self,
        name: Name,
        buffer: Bytes,
        is_last: bool,
        start_offset: u32,
    ) -> Result<u32, TransportError> {
        let segments = build_segments(&self.config, name, buffer, is_last, start_offset)?;
        let mut produced = 0u32;
        for segment in segments {
            if !segment.is_manifest() {
                produced += 1;
            }
            self.publish(segment);
        }
        debug!(produced, start_offset, "stream produced");
        Ok(produced)
    }

    /// Publish one datagram under `name` as a single content object.
    pub fn produce_datagram(&mut self, name: Name, buffer: Bytes) -> Result<(), TransportError> {
        if buffer.len() > self.config.max_segment_payload() {
            return Err(TransportError::InvalidPacket(format!(
                "datagram of {} bytes exceeds the {}-byte segment budget",
                buffer.len(),
                self.config.max_segment_payload()
            )));
        }

        let mut content = ContentObject::new(name, buffer);
        content.set_expiry_ms(self.config.content_expiry_ms);
        if let Some(signer) = &self.config.signer {
            content.sign_with(signer.as_ref())?;
        }
        self.publish(content);
        Ok(())
    }

    /// Produce on a dedicated worker; segments stream back to the serve
    /// loop, which publishes them in suffix order and fires
    /// `content_produced` exactly once after the last one.
    pub fn produce_stream_async(
        &mut self,
        name: Name,
        buffer: Bytes,
        is_last: bool,
        start_offset: u32,
    ) -> Result<(), TransportError> {
        if self.worker_rx.is_some() {
            return Err(TransportError::InvalidConfiguration(
                "async production already in progress".into(),
            ));
        }

        let (tx, rx) = mpsc::channel();
        let config = clone_config(&self.config);

        let handle = std::thread::spawn(move || {
            let produced_bytes = buffer.len() as u64;
            match build_segments(&config, name, buffer, is_last, start_offset) {
                Ok(segments) => {
                    for segment in segments {
                        if tx.send(WorkerMessage::Segment(Box::new(segment))).is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(WorkerMessage::Done(Ok(produced_bytes)));
                }
                Err(e) => {
                    let _ = tx.send(WorkerMessage::Done(Err(e)));
                }
            }
        });

        self.worker_rx = Some(rx);
        self.worker_handle = Some(handle);
        Ok(())
    }

    fn drain_worker(&mut self) {
        let rx = match self.worker_rx.take() {
            Some(rx) => rx,
            None => return,
        };

        let mut finished = false;
        loop {
            match rx.try_recv() {
                Ok(WorkerMessage::Segment(segment)) => self.publish(*segment),
                Ok(WorkerMessage::Done(result)) => {
                    match result {
                        Ok(produced_bytes) => {
                            debug!(produced_bytes, "async production finished");
                            if let Some(cb) = &mut self.callbacks.content_produced {
                                cb(None, produced_bytes);
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "async production failed");
                            if let Some(cb) = &mut self.callbacks.content_produced {
                                cb(Some(&e), 0);
                            }
                        }
                    }
                    finished = true;
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    finished = true;
                    break;
                }
            }
        }

        if finished {
            if let Some(handle) = self.worker_handle.take() {
                let _ = handle.join();
            }
        } else {
            self.worker_rx = Some(rx);
        }
    }

    /// Drain posted work and handle at most one inbound interest.
    ///
    /// Cache hits are served internally; a cache miss is returned to the
    /// caller (after the `cache_miss` callback) so it can produce and
    /// call again — the live-production pattern.
    pub fn process_one(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Interest>, TransportError> {
        self.drain_worker();

        let interest = match self.portal.poll(timeout)? {
            Some(PacketEvent::Interest(interest)) => interest,
            Some(PacketEvent::Content(_)) | None => return Ok(None),
        };

        if let Some(cb) = &mut self.callbacks.interest_pass {
            cb(&interest);
        }

        if self.config.virtual_mode {
            self.virtual_reply(&interest)?;
            return Ok(None);
        }

        let suffix = interest.suffix();
        match self.output_buffer.get(suffix).cloned() {
            Some(content) => {
                // Stored objects carry their signature; serving never
                // re-invokes the signer.
                if let Some(cb) = &mut self.callbacks.cache_hit {
                    cb(&interest);
                }
                self.portal.send_content(&content)?;
                Ok(None)
            }
            None => {
                if let Some(cb) = &mut self.callbacks.cache_miss {
                    cb(&interest);
                }
                Ok(Some(interest))
            }
        }
    }

    /// Serve pre-produced content until stopped; cache misses are only
    /// reported through the callback.
    pub fn serve(
        &mut self,
        stop: &StopHandle,
        run_for: Option<Duration>,
    ) -> Result<(), TransportError> {
        let started = hicn_io::Timestamp::now();
        loop {
            let deadline_hit = run_for.map(|d| started.elapsed() >= d).unwrap_or(false);
            if stop.is_stopped() || deadline_hit {
                self.shutdown();
                return Ok(());
            }
            match self.process_one(MAX_POLL_INTERVAL) {
                Ok(_) => {}
                Err(TransportError::Disconnected) => {
                    self.shutdown();
                    return Err(TransportError::Disconnected);
                }
                Err(e) => {
                    warn!(error = %e, "serve loop error");
                    return Err(e);
                }
            }
        }
    }

    fn virtual_reply(&mut self, interest: &Interest) -> Result<(), TransportError> {
        if self.virtual_pool.is_empty() {
            return Ok(());
        }
        if let Some(cb) = &mut self.callbacks.cache_miss {
            cb(interest);
        }

        let index = self.virtual_index % self.virtual_pool.len();
        self.virtual_index = self.virtual_index.wrapping_add(1);
        self.virtual_pool[index].set_name(*interest.name());
        let content = self.virtual_pool[index].clone();
        self.portal.send_content(&content)
    }

    /// Drain the worker, flush bookkeeping and close the portal.
    pub fn shutdown(&mut self) {
        self.drain_worker();
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
        self.drain_worker();
        self.portal.stop();
    }
}

fn clone_config(config: &ProducerConfig) -> ProducerConfig {
    ProducerConfig {
        data_packet_size: config.data_packet_size,
        content_expiry_ms: config.content_expiry_ms,
        manifest: config.manifest,
        manifest_capacity: config.manifest_capacity,
        hash_algorithm: config.hash_algorithm,
        signer: config.signer.clone(),
        output_buffer_size: config.output_buffer_size,
        virtual_mode: config.virtual_mode,
    }
}

/// Split `buffer` into published content objects starting at
/// `start_offset`, in wire-suffix order.
///
/// Without manifests every data segment is signed individually. With
/// manifests each group of up to `manifest_capacity` segments is preceded
/// by a signed manifest listing their digests; the manifest sits at the
/// first suffix of the range and the segments take the subsequent ones.
fn build_segments(
    config: &ProducerConfig,
    name: Name,
    buffer: Bytes,
    is_last: bool,
    start_offset: u32,
) -> Result<Vec<ContentObject>, TransportError> {
    let chunk_size = config.max_segment_payload();
    let chunk_count = ((buffer.len() + chunk_size - 1) / chunk_size).max(1);

    let mut chunks = Vec::with_capacity(chunk_count);
    let mut offset = 0usize;
    while offset < buffer.len() {
        let end = (offset + chunk_size).min(buffer.len());
        chunks.push(buffer.slice(offset..end));
        offset = end;
    }
    if chunks.is_empty() {
        chunks.push(Bytes::new());
    }

    if !config.manifest {
        let mut out = Vec::with_capacity(chunks.len());
        let last_index = chunks.len() - 1;
        let final_suffix = start_offset + last_index as u32;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let suffix = start_offset + i as u32;
            let mut content = ContentObject::new(name.with_suffix(suffix), chunk);
            content.set_expiry_ms(config.content_expiry_ms);
            if is_last {
                // Every segment announces the end, so consumers stop
                // requesting past it no matter which segment they see
                // first.
                content.set_final_suffix_hint(final_suffix);
                if i == last_index {
                    content.set_final(true);
                }
            }
            if let Some(signer) = &config.signer {
                content.sign_with(signer.as_ref())?;
            }
            out.push(content);
        }
        return Ok(out);
    }

    // Manifest mode: [manifest, seg, .., seg] groups.
    let capacity = config.manifest_capacity;
    let group_count = (chunks.len() + capacity - 1) / capacity;
    let mut out = Vec::with_capacity(chunks.len() + group_count);
    let mut wire_suffix = start_offset;
    let last_chunk_index = chunks.len() - 1;
    let mut chunk_index = 0usize;

    for group in 0..group_count {
        let manifest_suffix = wire_suffix;
        let group_len = capacity.min(chunks.len() - chunk_index);
        let is_last_group = group == group_count - 1;

        let mut segments = Vec::with_capacity(group_len);
        let mut manifest = Manifest::new(config.hash_algorithm);
        for i in 0..group_len {
            let suffix = manifest_suffix + 1 + i as u32;
            let mut content =
                ContentObject::new(name.with_suffix(suffix), chunks[chunk_index].clone());
            content.set_expiry_ms(config.content_expiry_ms);
            if is_last && chunk_index == last_chunk_index {
                content.set_final(true);
            }
            manifest.push(suffix, content.digest(config.hash_algorithm));
            segments.push(content);
            chunk_index += 1;
        }

        let group_end = manifest_suffix + group_len as u32;
        if is_last_group {
            if is_last {
                manifest.final_suffix = Some(group_end);
            }
        } else {
            manifest.next_manifest = Some(group_end + 1);
        }

        let mut manifest_object = manifest.into_content_object(
            name.with_suffix(manifest_suffix),
            config.content_expiry_ms,
        );
        if let Some(signer) = &config.signer {
            manifest_object.sign_with(signer.as_ref())?;
        }

        out.push(manifest_object);
        out.extend(segments);
        wire_suffix = group_end + 1;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProducerCallbacks;
    use hicn_io::LoopbackConnector;

    fn make_producer(config: ProducerConfig) -> (StreamProducer, LoopbackConnector) {
        let (a, b) = LoopbackConnector::pair();
        let mut producer =
            StreamProducer::new(config, ProducerCallbacks::default(), Portal::new(Box::new(a)))
                .unwrap();
        producer.register_prefix("b001::/64".parse().unwrap());
        (producer, b)
    }

    fn name() -> Name {
        "b001::abcd|0".parse().unwrap()
    }

    #[test]
    fn test_segmentation_counts() {
        let config = ProducerConfig {
            data_packet_size: 1100,
            ..Default::default()
        };
        let chunk = config.max_segment_payload();
        let (mut producer, _peer) = make_producer(config);

        let buffer = Bytes::from(vec![0u8; chunk * 3 + 1]);
        let produced = producer.produce_stream(name(), buffer, true, 0).unwrap();
        assert_eq!(produced, 4);
        assert_eq!(producer.output_buffer_len(), 4);
        assert_eq!(producer.last_published_suffix(), 3);
    }

    #[test]
    fn test_final_flag_on_last_segment_only() {
        let config = ProducerConfig {
            data_packet_size: 1100,
            ..Default::default()
        };
        let segments = build_segments(
            &config,
            name(),
            Bytes::from(vec![1u8; config.max_segment_payload() * 2]),
            true,
            0,
        )
        .unwrap();

        assert_eq!(segments.len(), 2);
        assert!(!segments[0].is_final());
        assert!(segments[1].is_final());
    }

    #[test]
    fn test_multiphase_offsets() {
        let config = ProducerConfig::default();
        let chunk = config.max_segment_payload();
        let (mut producer, _peer) = make_producer(config);

        let produced = producer
            .produce_stream(name(), Bytes::from(vec![0u8; chunk * 2]), false, 0)
            .unwrap();
        assert_eq!(produced, 2);

        // Next phase continues where the previous one stopped.
        let next_offset = producer.last_published_suffix() + 1;
        assert_eq!(next_offset, 2);
        let produced = producer
            .produce_stream(name(), Bytes::from(vec![0u8; chunk]), true, next_offset)
            .unwrap();
        assert_eq!(produced, 1);
        assert_eq!(producer.last_published_suffix(), 2);
    }

    #[test]
    fn test_manifest_layout() {
        let config = ProducerConfig {
            manifest: true,
            manifest_capacity: 4,
            ..Default::default()
        };
        let chunk = config.max_segment_payload();
        let segments =
            build_segments(&config, name(), Bytes::from(vec![7u8; chunk * 10]), true, 0).unwrap();

        // 10 data segments under 3 manifests.
        assert_eq!(segments.len(), 13);
        let manifests: Vec<&ContentObject> =
            segments.iter().filter(|s| s.is_manifest()).collect();
        assert_eq!(manifests.len(), 3);
        assert_eq!(manifests[0].suffix(), 0);
        assert_eq!(manifests[1].suffix(), 5);
        assert_eq!(manifests[2].suffix(), 10);

        // Every data suffix is covered by exactly one manifest.
        let mut covered: Vec<u32> = Vec::new();
        for manifest in &manifests {
            let decoded = Manifest::decode_payload(manifest.payload()).unwrap();
            covered.extend(decoded.entries.iter().map(|e| e.suffix));
        }
        covered.sort_unstable();
        assert_eq!(covered, vec![1, 2, 3, 4, 6, 7, 8, 9, 11, 12]);

        let last = Manifest::decode_payload(manifests[2].payload()).unwrap();
        assert_eq!(last.final_suffix, Some(12));
        assert_eq!(last.next_manifest, None);
    }

    #[test]
    fn test_manifest_mode_signs_only_manifests() {
        let config = ProducerConfig {
            manifest: true,
            manifest_capacity: 4,
            signer: Some(Arc::new(hicn_auth::SymmetricSigner::new("key"))),
            ..Default::default()
        };
        let chunk = config.max_segment_payload();
        let segments =
            build_segments(&config, name(), Bytes::from(vec![7u8; chunk * 6]), true, 0).unwrap();

        for segment in &segments {
            if segment.is_manifest() {
                assert!(segment.signature().is_some());
            } else {
                assert!(segment.signature().is_none());
            }
        }
    }

    #[test]
    fn test_datagram_size_check() {
        let config = ProducerConfig::default();
        let too_big = config.max_segment_payload() + 1;
        let (mut producer, _peer) = make_producer(config);

        assert!(producer
            .produce_datagram(name(), Bytes::from(vec![0u8; too_big]))
            .is_err());
        producer
            .produce_datagram(name(), Bytes::from_static(b"ok"))
            .unwrap();
    }

    #[test]
    fn test_async_production_publishes_in_order() {
        let (mut producer, _peer) = make_producer(ProducerConfig::default());
        let chunk = 1000usize;
        producer
            .produce_stream_async(name(), Bytes::from(vec![0u8; chunk * 5]), true, 0)
            .unwrap();

        // Drain until the worker finishes.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while producer.worker_rx.is_some() && std::time::Instant::now() < deadline {
            producer.drain_worker();
            std::thread::sleep(Duration::from_millis(1));
        }

        assert!(producer.output_buffer_len() > 0);
        // Last published suffix equals the final segment's suffix.
        assert_eq!(
            producer.last_published_suffix() as usize + 1,
            producer.output_buffer_len()
        );
    }
}
