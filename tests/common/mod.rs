#![allow(dead_code)]

use solivia_exporter::prelude::*;
use solivia_exporter::solivia::{encode_frame, CommandSchema, PayloadKind};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const ADDRESS: u8 = 1;

/// How the fake inverter answers a given command.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Never answers.
    Silent,
    /// A valid frame carrying this payload.
    Payload(Vec<u8>),
    /// First `failures` replies have a flipped checksum byte, then valid.
    Flaky { failures: usize, payload: Vec<u8> },
    /// A valid reply for some other command first, then the real one.
    StaleFirst {
        other: CommandCode,
        other_payload: Vec<u8>,
        payload: Vec<u8>,
    },
    /// Closes the line as soon as the request arrives.
    HangUp,
}

pub struct FakeInverter {
    pub requests: Arc<Mutex<Vec<CommandCode>>>,
}

impl FakeInverter {
    /// Spawns the device side of an in-memory serial line and returns the
    /// host side. Commands without an entry in `replies` get no answer.
    pub fn spawn(replies: HashMap<CommandCode, Reply>) -> (DuplexStream, Self) {
        let (host, device) = tokio::io::duplex(4096);
        let requests = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(serve(device, replies, requests.clone()));
        (host, Self { requests })
    }

    pub fn requests(&self) -> Vec<CommandCode> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

async fn serve(
    mut io: DuplexStream,
    replies: HashMap<CommandCode, Reply>,
    requests: Arc<Mutex<Vec<CommandCode>>>,
) {
    let mut seen: HashMap<CommandCode, usize> = HashMap::new();
    let mut request = [0u8; 6];

    loop {
        if io.read_exact(&mut request).await.is_err() {
            return;
        }
        assert_eq!(request[3], 0, "read requests carry no payload");
        let code = CommandCode::new(request[1], request[2]);
        requests.lock().unwrap().push(code);
        let count = seen.entry(code).or_insert(0);
        *count += 1;

        let out = match replies.get(&code) {
            None | Some(Reply::Silent) => continue,
            Some(Reply::HangUp) => return,
            Some(Reply::Payload(payload)) => frame(code, payload),
            Some(Reply::Flaky { failures, payload }) => {
                let mut f = frame(code, payload);
                if *count <= *failures {
                    let last = f.len() - 1;
                    f[last] ^= 0xFF;
                }
                f
            }
            Some(Reply::StaleFirst {
                other,
                other_payload,
                payload,
            }) => {
                let mut f = frame(*other, other_payload);
                f.extend(frame(code, payload));
                f
            }
        };

        if io.write_all(&out).await.is_err() {
            return;
        }
    }
}

pub fn frame(code: CommandCode, payload: &[u8]) -> Vec<u8> {
    encode_frame(ADDRESS, code, payload).unwrap()
}

pub struct Factory;

impl Factory {
    pub fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::builtin())
    }

    pub fn options() -> SessionOptions {
        SessionOptions {
            address: ADDRESS,
            read_timeout: Duration::from_millis(50),
            write_timeout: Duration::from_millis(50),
            retries: 2,
            retry_backoff: Duration::from_millis(5),
        }
    }

    /// A payload the catalog decodes without error: `00 64` for scaled
    /// commands, `A` padding for strings.
    pub fn payload_for(schema: &CommandSchema) -> Vec<u8> {
        match schema.kind {
            PayloadKind::FixedString(length) => vec![b'A'; length],
            PayloadKind::Scaled { .. } => vec![0x00, 0x64],
        }
    }

    /// Valid replies for every command in the built-in table.
    pub fn healthy_replies() -> HashMap<CommandCode, Reply> {
        let catalog = Catalog::builtin();
        catalog
            .codes()
            .map(|code| {
                let schema = catalog.lookup(code).unwrap();
                (code, Reply::Payload(Self::payload_for(schema)))
            })
            .collect()
    }

    pub fn session(replies: HashMap<CommandCode, Reply>) -> (Session<DuplexStream>, FakeInverter) {
        let (host, inverter) = FakeInverter::spawn(replies);
        (Session::new(host, Self::catalog(), Self::options()), inverter)
    }

    pub fn config_yaml() -> String {
        r#"
serial:
  device: /dev/ttyUSB0
  read_timeout_ms: 50
  write_timeout_ms: 50
  retries: 1
  retry_backoff_ms: 5
poll_interval_secs: 1
commands: ["AC Power", "Day Wh", "FW Version"]
metrics:
  enabled: false
"#
        .to_string()
    }

    pub fn config() -> ConfigWrapper {
        ConfigWrapper::from_config(Config::from_yaml(&Self::config_yaml()).unwrap())
    }
}
