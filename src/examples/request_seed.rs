use airgap_keys::*;
use std::net::UdpSocket;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEMO_FINGERPRINT: u32 = 0x3dc8_a2f0;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🔑 Requesting seed {:08x}", DEMO_FINGERPRINT);

    // Datagrams stand in for QR frames on screen.
    let sock = UdpSocket::bind("127.0.0.1:50052")?;
    sock.connect("127.0.0.1:50051")?;

    let config = Config::from_env()?;
    let mut requester = Requester::new(config);
    let request = TransactionRequest::new(RequestBody::seed_lookup(DEMO_FINGERPRINT)?)
        .with_description("demo wallet restore");
    println!("📡 Transaction {}", request.id);
    requester.start(request)?;

    if let Some(display) = requester.display_mut() {
        let loops = display.frame_count().max(1) * 2;
        println!("\n1️⃣  Displaying request in {} frame(s)...", display.frame_count());
        for _ in 0..loops {
            sock.send(display.current_frame())?;
            std::thread::sleep(display.interval());
            display.tick(display.interval());
        }
    }

    println!("\n2️⃣  Scanning for response...");
    requester.begin_scan()?;
    sock.set_read_timeout(Some(Duration::from_secs(60)))?;
    let mut buf = vec![0u8; 65536];
    loop {
        let size = sock.recv(&mut buf)?;
        match requester.ingest_frame(&buf[..size]) {
            Ok(RequesterState::Completed { .. }) => break,
            Ok(_) => {}
            Err(e) => eprintln!("❌ {}", e),
        }
    }

    if let Some(response) = requester.response() {
        match &response.body {
            ResponseBody::Seed(seed) => {
                println!("✅ Received seed \"{}\" ({} bytes)", seed.name, seed.data().len());
                if !seed.note.is_empty() {
                    println!("   Note: {}", seed.note);
                }
            }
            ResponseBody::Key(key) => println!("✅ Received {} key", key.key_type),
        }
    }

    Ok(())
}
