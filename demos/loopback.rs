//! Loopback demo: a link talking to an in-process simulated radio.
//!
//! The simulated radio announces itself with a heartbeat, relays one uplink
//! packet from "the ground", and acknowledges every command the link sends.
//!
//! Run with: `cargo run --example loopback`

use std::time::Duration;

use radiolink::clock::SystemClock;
use radiolink::direct_message::{Heartbeat, RadioActivity, RadioPhase};
use radiolink::protocol::{
    build_text_frame, encode_response, encode_udp_data_event, Frame, Mpsm,
};
use radiolink::LinkBuilder;
use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream};

async fn simulated_radio(mut stream: DuplexStream) -> radiolink::Result<()> {
    let hb = Heartbeat {
        downlink_endpoint: 2,
        uplink_endpoint: 3,
        state: RadioPhase::UdpConnected,
        activity: RadioActivity::RemainingVigilant,
        fully_valid: true,
    };
    stream.write_all(&build_text_frame(&hb.to_payload())?).await?;
    stream
        .write_all(&encode_udp_data_event(3, [192, 168, 4, 1], 7000, b"drive 1m")?)
        .await?;

    let mut mpsm = Mpsm::new(SystemClock::shared());
    let mut frame = Frame::with_capacity(1024);
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let mut commands = Vec::new();
        mpsm.feed(&mut frame, &buf[..n], |f| {
            if let Some(h) = f.structured_header() {
                println!("radio: command {} ({} byte payload)", h.command_id, f.len());
                commands.push(h.command_id);
            }
        });
        for id in commands {
            stream.write_all(&encode_response(id, 0, 2)?).await?;
        }
    }
}

#[tokio::main]
async fn main() -> radiolink::Result<()> {
    let (link_end, radio_end) = duplex(4096);
    let radio = tokio::spawn(simulated_radio(radio_end));

    let (reader, writer) = split(link_end);
    let mut link = LinkBuilder::new()
        .hello_message("rover online")
        .ready_poll_interval_ms(10)
        .start(reader, writer)
        .await?;

    let command = link.next_uplink().await;
    println!("link: uplink {:?}", String::from_utf8_lossy(&command));

    link.downlink(vec![0xAB; 600])?;

    // Hello, the uplink acknowledgement, then our payload.
    for _ in 0..3 {
        let outcome = tokio::time::timeout(Duration::from_secs(5), link.next_outcome())
            .await
            .map_err(|_| radiolink::LinkError::ChannelClosed)??;
        println!("link: {:?}", outcome);
    }

    println!("link: status {:?}", link.status());
    println!("link: telemetry {} bytes", link.telemetry()?.len());

    drop(link);
    radio.abort();
    Ok(())
}
