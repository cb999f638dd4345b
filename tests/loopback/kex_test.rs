use anyhow::{Result, bail, ensure};
use bytes::Bytes;
use kusari::{CipherAlgo, KexAlgo, MacAlgo, TunnelEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use crate::{
    Pair, authenticate_alice, connect, connect_alice, next_client_event, next_server_channel, server_config,
};

/// Sends `len` bytes through a `"direct-tcpip"` tunnel to the server and checks that they all
/// arrived.
async fn transfer(pair: &mut Pair, len: usize) -> Result<()> {
    let client = pair.client.clone();
    let connect_task = tokio::spawn(async move {
        client.connect_tunnel(
            kusari::ChannelConfig::default(),
            ("localhost".into(), 7),
            ("localhost".into(), 1),
        ).await
    });
    let accept = next_server_channel(pair).await?;
    let (server_tunnel, mut server_tunnel_rx) = accept.accept_tunnel(kusari::ChannelConfig::default()).await?;
    let (tunnel, _tunnel_rx) = connect_task.await??;

    let data: Bytes = (0..len).map(|i| (i % 253) as u8).collect::<Vec<_>>().into();
    let send_task = tokio::spawn({
        let data = data.clone();
        async move {
            for chunk in data.chunks(10_000) {
                tunnel.send_data(Bytes::copy_from_slice(chunk)).await?;
            }
            tunnel.send_eof().await
        }
    });

    let mut received = Vec::with_capacity(len);
    loop {
        match server_tunnel_rx.recv().await {
            Some(TunnelEvent::Data(chunk)) => received.extend_from_slice(&chunk),
            Some(TunnelEvent::Eof) => break,
            event => bail!("unexpected event {:?}", event),
        }
    }
    send_task.await??;
    server_tunnel.close();
    ensure!(received == data, "received {} bytes, expected {}", received.len(), data.len());
    Ok(())
}

async fn check_algos(kex: &'static KexAlgo, cipher: &'static CipherAlgo, mac: &'static MacAlgo) -> Result<()> {
    log::info!("checking kex {:?}, cipher {:?}, mac {:?}", kex.name, cipher.name, mac.name);
    let client_config = kusari::ClientConfig::default_compatible_less_secure().with(|c| {
        c.kex_algos = vec![kex];
        c.cipher_algos = vec![cipher];
        c.mac_algos = vec![mac];
    });
    let server_config = kusari::ServerConfig::default_compatible_less_secure().with(|c| {
        c.host_keys = vec![crate::host_privkey()];
    });
    let mut pair = connect(client_config, server_config)?;
    authenticate_alice(&pair.client).await?;
    transfer(&mut pair, 20_000).await
}

#[tokio::test]
async fn test_kex_algos() -> Result<()> {
    let kex_algos = [
        &kusari::kex::CURVE25519_SHA256,
        &kusari::kex::CURVE25519_SHA256_LIBSSH,
        &kusari::kex::DIFFIE_HELLMAN_GROUP14_SHA256,
        &kusari::kex::DIFFIE_HELLMAN_GROUP14_SHA1,
        &kusari::kex::DIFFIE_HELLMAN_GROUP1_SHA1,
    ];
    for kex in kex_algos {
        check_algos(kex, &kusari::cipher::AES128_CTR, &kusari::mac::HMAC_SHA2_256).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_kex_group_exchange() -> Result<()> {
    for kex in [&kusari::kex::DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256, &kusari::kex::DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1] {
        check_algos(kex, &kusari::cipher::AES256_CTR, &kusari::mac::HMAC_SHA2_256).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_cipher_algos() -> Result<()> {
    let cipher_algos = [
        &kusari::cipher::CHACHA20_POLY1305,
        &kusari::cipher::AES128_GCM,
        &kusari::cipher::AES256_GCM,
        &kusari::cipher::AES192_CTR,
        &kusari::cipher::AES128_CBC,
        &kusari::cipher::AES256_CBC,
    ];
    for cipher in cipher_algos {
        check_algos(&kusari::kex::CURVE25519_SHA256, cipher, &kusari::mac::HMAC_SHA2_512_ETM).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_mac_algos() -> Result<()> {
    let mac_algos = [
        &kusari::mac::HMAC_SHA2_256,
        &kusari::mac::HMAC_SHA2_512,
        &kusari::mac::HMAC_SHA1,
        &kusari::mac::HMAC_SHA2_256_ETM,
        &kusari::mac::HMAC_SHA1_ETM,
    ];
    for mac in mac_algos {
        check_algos(&kusari::kex::CURVE25519_SHA256, &kusari::cipher::AES128_CTR, mac).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_host_key_algos() -> Result<()> {
    let mut rng = <rand_chacha::ChaCha8Rng as rand::SeedableRng>::seed_from_u64(7);
    let host_keys: Vec<(kusari::Privkey, &'static kusari::PubkeyAlgo)> = vec![
        (kusari::Privkey::EcdsaP256(kusari::p256::ecdsa::SigningKey::random(&mut rng).into()), &kusari::pubkey::ECDSA_SHA2_NISTP256),
        (kusari::Privkey::EcdsaP384(kusari::p384::ecdsa::SigningKey::random(&mut rng).into()), &kusari::pubkey::ECDSA_SHA2_NISTP384),
    ];
    for (host_key, algo) in host_keys {
        let client_config = kusari::ClientConfig::default().with(|c| c.server_pubkey_algos = vec![algo]);
        let server_config = server_config().with(|c| c.host_keys = vec![host_key.clone()]);

        crate::init_log();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client, mut client_rx, client_fut) = kusari::Client::open(client_io, client_config)?;
        let (_server, _server_rx, server_fut) = kusari::Server::accept(server_io, server_config)?;
        let client_task = tokio::spawn(client_fut);
        let server_task = tokio::spawn(server_fut);

        let expected = host_key.pubkey();
        let verified = match client_rx.recv().await {
            Some(kusari::ClientEvent::ServerPubkey(pubkey, accept_tx)) => {
                let verified = pubkey == expected;
                accept_tx.accept();
                verified
            },
            event => bail!("unexpected event {:?}", event),
        };
        ensure!(verified, "server presented a different host key for {:?}", algo.name);

        client.disconnect(kusari::DisconnectError::by_app())?;
        client_task.await??;
        let _ = server_task.await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_host_key_rejected() -> Result<()> {
    let config = server_config().with(|c| c.host_keys = vec![crate::ed25519_privkey(0x99)]);
    let mut pair = connect(kusari::ClientConfig::default(), config)?;
    match (&mut pair.client_task).await? {
        Err(kusari::Error::PubkeyAccept(_)) => Ok(()),
        res => bail!("expected the host key to be rejected, got {:?}", res),
    }
}

#[tokio::test]
async fn test_negotiation_failure() -> Result<()> {
    let client_config = kusari::ClientConfig::default().with(|c| {
        c.cipher_algos = vec![&kusari::cipher::AES128_CBC];
    });
    let mut pair = connect(client_config, server_config())?;
    match (&mut pair.client_task).await? {
        Err(kusari::Error::AlgoNegotiate(err)) => {
            ensure!(err.our_algos == vec!["aes128-cbc".to_string()], "our algos are {:?}", err.our_algos);
            Ok(())
        },
        res => bail!("expected the negotiation to fail, got {:?}", res),
    }
}

#[tokio::test]
async fn test_compression() -> Result<()> {
    for compress in [&kusari::compress::ZLIB, &kusari::compress::ZLIB_OPENSSH] {
        let client_config = kusari::ClientConfig::default().with(|c| c.compress_algos = vec![compress]);
        let server_config = server_config().with(|c| c.compress_algos = vec![compress]);
        let mut pair = connect(client_config, server_config)?;
        authenticate_alice(&pair.client).await?;
        transfer(&mut pair, 100_000).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_explicit_rekey() -> Result<()> {
    let mut pair = connect_alice().await?;
    transfer(&mut pair, 10_000).await?;
    pair.client.rekey().await?;
    transfer(&mut pair, 10_000).await?;
    pair.server.rekey().await?;
    transfer(&mut pair, 10_000).await?;
    Ok(())
}

#[tokio::test]
async fn test_rekey_after_bytes() -> Result<()> {
    let client_config = kusari::ClientConfig::default().with(|c| c.rekey_after_bytes = 20_000);
    let server_config = server_config().with(|c| c.rekey_after_packets = 50);
    let mut pair = connect(client_config, server_config)?;
    authenticate_alice(&pair.client).await?;
    transfer(&mut pair, 200_000).await?;
    transfer(&mut pair, 200_000).await
}

/// Connects like [`connect()`], but leaves every `ServerPubkey` decision to the test.
fn connect_manual_host_key() -> Result<Pair> {
    crate::init_log();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, mut client_rx, client_fut) = kusari::Client::open(client_io, kusari::ClientConfig::default())?;
    let (server, server_rx, server_fut) = kusari::Server::accept(server_io, server_config())?;

    let (event_tx, client_events) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = client_rx.recv().await {
            let _ = event_tx.send(event);
        }
    });
    Ok(Pair {
        client,
        client_events,
        client_task: tokio::spawn(client_fut),
        server,
        server_events: crate::decide_auth(server_rx),
        server_task: tokio::spawn(server_fut),
    })
}

async fn next_server_pubkey(pair: &mut Pair) -> Result<kusari::AcceptPubkeySender> {
    match next_client_event(pair).await? {
        kusari::ClientEvent::ServerPubkey(pubkey, accept_tx) => {
            ensure!(pubkey == crate::host_privkey().pubkey(), "unexpected server key {}", pubkey);
            Ok(accept_tx)
        },
        event => bail!("expected a server pubkey, got {:?}", event),
    }
}

#[tokio::test]
async fn test_rekey_holds_data_until_host_key_accepted() -> Result<()> {
    let mut pair = connect_manual_host_key()?;
    next_server_pubkey(&mut pair).await?.accept();
    authenticate_alice(&pair.client).await?;

    let client = pair.client.clone();
    let open_task = tokio::spawn(async move { client.open_session(kusari::ChannelConfig::default()).await });
    let accept = next_server_channel(&mut pair).await?;
    let (server_session, _server_session_rx) = accept.accept_session(kusari::ChannelConfig::default()).await?;
    let (_session, mut session_rx) = open_task.await??;

    let client = pair.client.clone();
    let rekey_task = tokio::spawn(async move { client.rekey().await });
    let accept_tx = next_server_pubkey(&mut pair).await?;

    let send_task = tokio::spawn(async move {
        server_session.send_stdout(Bytes::from_static(b"after rekey")).await?;
        kusari::Result::Ok(server_session)
    });

    // the server has switched to the new keys, but we have not
    let early = tokio::time::timeout(Duration::from_millis(300), session_rx.recv()).await;
    ensure!(early.is_err(), "received {:?} before the server key was accepted", early);
    ensure!(!rekey_task.is_finished(), "rekey finished before the server key was accepted");

    accept_tx.accept();
    tokio::time::timeout(Duration::from_secs(10), rekey_task).await???;
    match tokio::time::timeout(Duration::from_secs(10), session_rx.recv()).await?? {
        Some(kusari::SessionEvent::StdoutData(data)) =>
            ensure!(data.as_ref() == b"after rekey", "received {:?}", data),
        event => bail!("unexpected event {:?}", event),
    }
    let _server_session = send_task.await??;
    Ok(())
}
