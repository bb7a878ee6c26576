use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use coapblock_client::{CoapClient, Payload, UdpTransport};
use coapblock_core::block::BlockOption;
use coapblock_core::config::ClientConfig;
use coapblock_core::wire::option;
use coapblock_core::{BlockSize, Code, ContentFormat};

use crate::server::{Reply, TestServer};
use crate::{fast_config, udp_client};

// ══════════════════════════════════════════════════════════════════════════════
//  Block1 uploads
// ══════════════════════════════════════════════════════════════════════════════

fn firmware(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[tokio::test]
async fn test_large_upload_is_reassembled() -> Result<()> {
    let body = Arc::new(Mutex::new(Vec::new()));
    let server = TestServer::assembling(Code::CHANGED, body.clone()).await?;
    let (client, _) = udp_client(BlockSize::B1024, 1024);

    let image = firmware(5_000);
    let resp = client
        .put(&server.url("fw/image"), Payload::from(image.clone()), ContentFormat::OctetStream, true)
        .await?;
    assert_eq!(resp.code, Code::CHANGED);
    assert_eq!(*body.lock().unwrap(), image);

    let requests = server.requests();
    assert_eq!(requests.len(), 5);
    let ids: HashSet<u16> = requests.iter().map(|r| r.message_id).collect();
    assert_eq!(ids.len(), 5, "each block needs its own message ID");

    for (i, req) in requests.iter().enumerate() {
        let block = BlockOption::decode(req.uint_option(option::BLOCK1).unwrap())?;
        assert_eq!(block.index as usize, i);
        assert_eq!(block.more, i < 4);
        assert_eq!(block.size, BlockSize::B1024);
        assert_eq!(req.uint_option(option::CONTENT_FORMAT), Some(42));
        assert_eq!(req.payload.len(), if i < 4 { 1024 } else { 904 });
    }
    Ok(())
}

#[tokio::test]
async fn test_exact_multiple_ends_with_full_block() -> Result<()> {
    let body = Arc::new(Mutex::new(Vec::new()));
    let server = TestServer::assembling(Code::CREATED, body.clone()).await?;
    let (client, _) = udp_client(BlockSize::B256, 256);

    let data = firmware(1_024);
    let resp = client
        .post(&server.url("upload"), Payload::from(data.clone()), ContentFormat::OctetStream, true)
        .await?;
    assert_eq!(resp.code, Code::CREATED);
    assert_eq!(*body.lock().unwrap(), data);

    let requests = server.requests();
    assert_eq!(requests.len(), 4);
    let last = BlockOption::decode(requests[3].uint_option(option::BLOCK1).unwrap())?;
    assert!(!last.more);
    assert_eq!(requests[3].payload.len(), 256);
    Ok(())
}

#[tokio::test]
async fn test_payload_at_limit_skips_block1() -> Result<()> {
    let body = Arc::new(Mutex::new(Vec::new()));
    let server = TestServer::assembling(Code::CHANGED, body.clone()).await?;
    let (client, _) = udp_client(BlockSize::B1024, 1024);

    let data = firmware(1_024);
    client
        .post(&server.url("upload"), Payload::from(data.clone()), ContentFormat::OctetStream, true)
        .await?;

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].uint_option(option::BLOCK1).is_none());
    assert_eq!(*body.lock().unwrap(), data);
    Ok(())
}

#[tokio::test]
async fn test_rejection_stops_transfer() -> Result<()> {
    let server = TestServer::spawn(|msg| {
        let block = BlockOption::decode(msg.uint_option(option::BLOCK1).unwrap()).unwrap();
        if block.index == 0 {
            Reply::Piggyback(Code::CONTINUE, Vec::new())
        } else {
            Reply::Piggyback(Code::REQUEST_ENTITY_TOO_LARGE, b"quota exceeded".to_vec())
        }
    })
    .await?;
    let (client, _) = udp_client(BlockSize::B64, 64);

    let err = client
        .post(&server.url("upload"), Payload::from(firmware(640)), ContentFormat::OctetStream, true)
        .await
        .unwrap_err();
    let resp = err.response().expect("rejection should carry the response");
    assert_eq!(resp.code, Code::REQUEST_ENTITY_TOO_LARGE);
    assert_eq!(resp.text(), "quota exceeded");
    assert_eq!(server.requests().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_lost_block_is_retransmitted_not_skipped() -> Result<()> {
    let body = Arc::new(Mutex::new(Vec::new()));
    let sink = body.clone();
    let mut dropped = false;
    let server = TestServer::spawn(move |msg| {
        let block = BlockOption::decode(msg.uint_option(option::BLOCK1).unwrap()).unwrap();
        if block.index == 1 && !dropped {
            dropped = true;
            return Reply::Drop;
        }
        sink.lock().unwrap().extend_from_slice(&msg.payload);
        if block.more {
            Reply::Piggyback(Code::CONTINUE, Vec::new())
        } else {
            Reply::Piggyback(Code::CHANGED, Vec::new())
        }
    })
    .await?;
    let (client, _) = udp_client(BlockSize::B128, 128);

    let data = firmware(300);
    let resp = client
        .put(&server.url("fw"), Payload::from(data.clone()), ContentFormat::OctetStream, true)
        .await?;
    assert_eq!(resp.code, Code::CHANGED);
    assert_eq!(*body.lock().unwrap(), data);

    let requests = server.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[1].message_id, requests[2].message_id);
    Ok(())
}

#[tokio::test]
async fn test_timeout_mid_transfer_sends_nothing_further() -> Result<()> {
    let server = TestServer::spawn(|msg| {
        let block = BlockOption::decode(msg.uint_option(option::BLOCK1).unwrap()).unwrap();
        if block.index == 0 {
            Reply::Piggyback(Code::CONTINUE, Vec::new())
        } else {
            Reply::Drop
        }
    })
    .await?;
    let (client, breaker) = udp_client(BlockSize::B16, 16);

    let err = client
        .post(&server.url("upload"), Payload::from(firmware(64)), ContentFormat::OctetStream, true)
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // Block 0 once, block 1 three times; blocks 2 and 3 never go out.
    let requests = server.requests();
    assert_eq!(requests.len(), 4);
    for req in &requests[1..] {
        let block = BlockOption::decode(req.uint_option(option::BLOCK1).unwrap())?;
        assert_eq!(block.index, 1);
    }
    assert_eq!(breaker.failures(), 1);
    Ok(())
}

#[tokio::test]
async fn test_long_path_upload_fits_default_packet_size() -> Result<()> {
    let body = Arc::new(Mutex::new(Vec::new()));
    let server = TestServer::assembling(Code::CHANGED, body.clone()).await?;
    let config = ClientConfig {
        transport: fast_config(),
        ..ClientConfig::default()
    };
    let client = CoapClient::from_config(UdpTransport::new(config.transport.clone()), &config)?;

    let path = format!("api/v1/devices/{}/firmware/upload", "a".repeat(100));
    let image = firmware(5_000);
    let resp = client
        .put(&server.url(&path), Payload::from(image.clone()), ContentFormat::OctetStream, true)
        .await?;
    assert_eq!(resp.code, Code::CHANGED);
    assert_eq!(*body.lock().unwrap(), image);

    // The options push a 1024-byte block past 1152 bytes, so blocks shrink.
    let requests = server.requests();
    assert_eq!(requests.len(), 10);
    for req in &requests {
        let block = BlockOption::decode(req.uint_option(option::BLOCK1).unwrap())?;
        assert_eq!(block.size, BlockSize::B512);
        assert!(req.encode()?.len() <= config.transport.max_packet_size);
    }
    Ok(())
}
