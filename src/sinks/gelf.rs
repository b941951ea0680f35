//! GELF/Graylog sink: gzip-compresses a GELF-shaped JSON payload and emits
//! it over UDP, chunking when the compressed payload exceeds one datagram.

use std::io::Write;
use std::net::UdpSocket;
use std::sync::Mutex;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Map, Value};

use super::{Sink, SinkError};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GelfSinkConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    8192
}

const GELF_MAGIC: [u8; 2] = [0x1e, 0x0f];
const MAX_CHUNKS: usize = 128;

pub struct GelfSink {
    config: GelfSinkConfig,
    socket: Mutex<UdpSocket>,
}

impl GelfSink {
    pub fn new(cfg: &super::DestinationConfig) -> anyhow::Result<Self> {
        let gelf_cfg = cfg
            .gelf
            .clone()
            .ok_or_else(|| anyhow::anyhow!("destination {:?} is type=gelf but has no [gelf] config", cfg.name))?;

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect((gelf_cfg.host.as_str(), gelf_cfg.port))?;

        Ok(Self {
            config: gelf_cfg,
            socket: Mutex::new(socket),
        })
    }

    fn to_gelf_payload(record: &Map<String, Value>) -> Value {
        let mut gelf = Map::new();
        gelf.insert("version".into(), json!("1.1"));

        let host = record
            .get("remote_ip")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        gelf.insert("host".into(), json!(host));

        let short_message = record
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("weblogproxy event")
            .to_string();
        gelf.insert("short_message".into(), json!(short_message));

        for (k, v) in record {
            if k == "host" || k == "short_message" || k == "version" {
                continue;
            }
            gelf.insert(format!("_{k}"), v.clone());
        }

        Value::Object(gelf)
    }

    fn chunks(compressed: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
        if compressed.len() <= chunk_size {
            return vec![compressed.to_vec()];
        }

        let message_id: [u8; 8] = {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64;
            now.to_be_bytes()
        };

        compressed
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, body)| {
                let total = compressed.len().div_ceil(chunk_size);
                let mut buf = Vec::with_capacity(GELF_MAGIC.len() + 10 + body.len());
                buf.extend_from_slice(&GELF_MAGIC);
                buf.extend_from_slice(&message_id);
                buf.push(i as u8);
                buf.push(total as u8);
                buf.extend_from_slice(body);
                buf
            })
            .collect()
    }
}

impl Sink for GelfSink {
    fn log(&self, record: &Map<String, Value>) -> Result<(), SinkError> {
        let payload = Self::to_gelf_payload(record);
        let json_bytes = serde_json::to_vec(&payload)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json_bytes)?;
        let compressed = encoder.finish()?;

        let chunks = Self::chunks(&compressed, self.config.chunk_size);
        if chunks.len() > MAX_CHUNKS {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("gelf message needs {} chunks, limit is {MAX_CHUNKS}", chunks.len()),
            )));
        }

        let socket = self.socket.lock().unwrap_or_else(|e| e.into_inner());
        for chunk in &chunks {
            socket.send(chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn small_payload_is_a_single_chunk() {
        let compressed = b"short";
        let chunks = GelfSink::chunks(compressed, 8192);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], compressed);
    }

    #[test]
    fn oversized_payload_is_chunked_with_gelf_header() {
        let compressed = vec![7u8; 20_000];
        let chunks = GelfSink::chunks(&compressed, 8192);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(&chunk[0..2], &GELF_MAGIC);
        }
    }

    #[test]
    fn gelf_payload_maps_known_fields() {
        let record: Map<String, Value> = serde_json::from_value(json!({
            "remote_ip": "1.2.3.4",
            "msg": "hello",
            "site_id": "s",
        }))
        .unwrap();
        let payload = GelfSink::to_gelf_payload(&record);
        assert_eq!(payload["host"], json!("1.2.3.4"));
        assert_eq!(payload["short_message"], json!("hello"));
        assert_eq!(payload["_site_id"], json!("s"));
        assert_eq!(payload["version"], json!("1.1"));
    }

    #[test]
    fn sends_a_real_udp_datagram_end_to_end() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        listener.set_read_timeout(Some(std::time::Duration::from_secs(2))).unwrap();

        let cfg = super::super::DestinationConfig {
            name: "g".into(),
            kind: super::super::DestinationType::Gelf,
            enabled: true,
            add_log_data: vec![],
            max_message_size: 1024,
            file: None,
            gelf: Some(GelfSinkConfig {
                host: addr.ip().to_string(),
                port: addr.port(),
                // Small enough that even this tiny payload is forced to chunk.
                chunk_size: 8,
            }),
        };
        let sink = GelfSink::new(&cfg).unwrap();
        let record: Map<String, Value> = serde_json::from_value(json!({"msg": "ping"})).unwrap();
        sink.log(&record).unwrap();

        let mut buf = [0u8; 4096];
        let (n, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[0..2], &GELF_MAGIC);
        assert!(n > 2);
    }
}
