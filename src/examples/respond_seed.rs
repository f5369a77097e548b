use airgap_keys::*;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::net::UdpSocket;
use tracing_subscriber::EnvFilter;

struct DemoKeychain {
    seeds: HashMap<u32, Seed>,
}

impl Keychain for DemoKeychain {
    fn find_seed(&self, fingerprint: u32) -> Option<Seed> {
        self.seeds.get(&fingerprint).cloned()
    }

    fn derive_key(&self, _key_type: KeyType, _path: &DerivationPath, _use_info: &UseInfo) -> Option<HdKey> {
        None
    }
}

/// Asks on stdin.
struct PromptUi;

impl ApprovalUi for PromptUi {
    fn request_approval(&mut self, disclosure: &Disclosure) -> Approval {
        println!("\n⚠️  {}", disclosure.description);
        print!("   Approve? [y/N] ");
        let _ = io::stdout().flush();

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return Approval::Rejected;
        }
        match answer.trim() {
            "y" | "Y" | "yes" => Approval::Accepted(disclosure.artifact.clone()),
            _ => Approval::Rejected,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🔐 Responder");
    println!("📡 Listening on 127.0.0.1:50051...\n");

    let sock = UdpSocket::bind("127.0.0.1:50051")?;
    let mut buf = vec![0u8; 65536];

    let keychain = DemoKeychain {
        seeds: HashMap::from([(
            0x3dc8_a2f0,
            Seed::new(vec![0x59; 16])?
                .with_name("Dark Purple")
                .with_note("demo seed"),
        )]),
    };
    let mut responder = Responder::new(Config::from_env()?);
    let mut ui = PromptUi;

    loop {
        let (size, src) = match sock.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) => {
                eprintln!("❌ Recv error: {}", e);
                continue;
            }
        };

        match responder.ingest_frame(&buf[..size], &keychain) {
            Ok(ResponderState::AwaitingApproval { .. }) => {}
            Ok(ResponderState::Rejected { request_id, reason }) => {
                println!("🚫 Request {} rejected: {:?}", request_id, reason);
                responder.reset();
                continue;
            }
            Ok(_) => continue,
            // repeats of a request already being handled
            Err(Error::Exchange(ExchangeError::InvalidState(_))) => continue,
            Err(e) => {
                eprintln!("❌ {}", e);
                continue;
            }
        }

        if let ResponderState::Rejected { request_id, reason } = responder.decide(&mut ui)? {
            println!("🚫 Request {} rejected: {:?}", request_id, reason);
        }

        if let Some(display) = responder.display_mut() {
            let loops = display.frame_count().max(1) * 3;
            println!("📤 Displaying response in {} frame(s)", display.frame_count());
            for _ in 0..loops {
                sock.send_to(display.current_frame(), src)?;
                std::thread::sleep(display.interval());
                display.tick(display.interval());
            }
            println!("✅ Done\n");
        }
        responder.reset();
    }
}
