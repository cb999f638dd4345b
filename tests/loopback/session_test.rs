use anyhow::{Result, bail, ensure};
use bytes::{Bytes, BytesMut};
use enclose::enclose;
use kusari::{ServerSessionEvent, SessionEvent, SessionRequest};
use tokio::sync::oneshot;
use crate::{Pair, connect, connect_alice, authenticate_alice, next_server_channel, server_config};

/// Server side of `cat`: echoes stdin to stdout, then exits with status 0.
async fn serve_cat(pair: &mut Pair) -> Result<tokio::task::JoinHandle<Result<()>>> {
    let accept = next_server_channel(pair).await?;
    ensure!(accept.channel_type == "session", "unexpected channel type {:?}", accept.channel_type);
    let (session, mut session_rx) = accept.accept_session(kusari::ChannelConfig::default()).await?;

    Ok(tokio::spawn(async move {
        while let Some(event) = session_rx.recv().await? {
            match event {
                ServerSessionEvent::Request(req) => {
                    let is_cat = matches!(&req.request,
                        SessionRequest::Exec { command } if command.as_ref() == b"cat");
                    if is_cat { req.accept() } else { req.reject() }
                },
                ServerSessionEvent::StdinData(data) => session.send_stdout(data).await?,
                ServerSessionEvent::Eof => {
                    session.send_stderr(Bytes::from_static(b"done")).await?;
                    session.send_eof().await?;
                    session.send_exit_status(0)?;
                    session.close();
                },
                event => bail!("unexpected event {:?}", event),
            }
        }
        Ok(())
    }))
}

/// Opens a session in the background, the open finishes only after the server accepts it.
fn spawn_open_session(pair: &Pair, config: kusari::ChannelConfig)
    -> tokio::task::JoinHandle<kusari::Result<(kusari::Session, kusari::SessionReceiver)>>
{
    let client = pair.client.clone();
    tokio::spawn(async move { client.open_session(config).await })
}

async fn run_cat(pair: &mut Pair, data: Bytes) -> Result<()> {
    let open_task = spawn_open_session(pair, kusari::ChannelConfig::default());
    let server_task = serve_cat(pair).await?;
    let (session, mut session_rx) = open_task.await??;

    session.exec(b"cat")?.want_reply().await?;

    let stdin_task = tokio::spawn(enclose!{(session, data) async move {
        for chunk in data.chunks(1000) {
            session.send_stdin(Bytes::copy_from_slice(chunk)).await?;
        }
        session.send_eof().await
    }});

    let mut stdout = BytesMut::new();
    let mut stderr = BytesMut::new();
    let mut eof = false;
    let mut exit_status = None;
    while let Some(event) = session_rx.recv().await? {
        match event {
            SessionEvent::StdoutData(chunk) => {
                ensure!(!eof, "received stdout after eof");
                stdout.extend_from_slice(&chunk);
            },
            SessionEvent::StderrData(chunk) => stderr.extend_from_slice(&chunk),
            SessionEvent::Eof => eof = true,
            SessionEvent::ExitStatus(status) => exit_status = Some(status),
            event => bail!("unexpected event {:?}", event),
        }
    }

    stdin_task.await??;
    server_task.await??;
    ensure!(eof, "session was closed before eof");
    ensure!(exit_status == Some(0), "exit status is {:?}", exit_status);
    ensure!(stdout.freeze() == data, "stdout does not match stdin");
    ensure!(stderr.as_ref() == b"done", "stderr is {:?}", stderr);
    Ok(())
}

fn test_data(len: usize) -> Bytes {
    (0..len).map(|i| (i * 7 % 251) as u8).collect::<Vec<_>>().into()
}

#[tokio::test]
async fn test_cat_default() -> Result<()> {
    let mut pair = connect_alice().await?;
    run_cat(&mut pair, test_data(300_000)).await
}

#[tokio::test]
async fn test_cat_group14_sha1_aes128_ctr() -> Result<()> {
    let client_config = kusari::ClientConfig::default_compatible_less_secure().with(|c| {
        c.kex_algos = vec![&kusari::kex::DIFFIE_HELLMAN_GROUP14_SHA1];
        c.cipher_algos = vec![&kusari::cipher::AES128_CTR];
        c.mac_algos = vec![&kusari::mac::HMAC_SHA1];
    });
    let server_config = kusari::ServerConfig::default_compatible_less_secure().with(|c| {
        c.host_keys = vec![crate::host_privkey()];
    });
    let mut pair = connect(client_config, server_config)?;
    authenticate_alice(&pair.client).await?;
    run_cat(&mut pair, test_data(50_000)).await
}

#[tokio::test]
async fn test_cat_small_window() -> Result<()> {
    let mut pair = connect_alice().await?;
    let open_task = spawn_open_session(&pair, kusari::ChannelConfig::default().with(|c| {
        c.recv_window_max = 2000;
        c.recv_packet_len_max = 500;
    }));

    let accept = next_server_channel(&mut pair).await?;
    let (server_session, mut server_session_rx) = accept.accept_session(kusari::ChannelConfig::default()).await?;
    let (session, mut session_rx) = open_task.await??;
    tokio::spawn(async move {
        while let Ok(Some(event)) = server_session_rx.recv().await {
            if let ServerSessionEvent::Request(req) = event { req.accept() }
        }
    });

    session.shell()?.want_reply().await?;
    let data = test_data(20_000);
    let send_task = tokio::spawn(enclose!{(data) async move {
        server_session.send_stdout(data).await?;
        server_session.send_eof().await?;
        server_session.close();
        kusari::Result::Ok(())
    }});

    let mut stdout = BytesMut::new();
    while let Some(event) = session_rx.recv().await? {
        if let SessionEvent::StdoutData(chunk) = event {
            ensure!(chunk.len() <= 500, "chunk of {} bytes exceeds the packet limit", chunk.len());
            stdout.extend_from_slice(&chunk);
        }
    }
    send_task.await??;
    ensure!(stdout.freeze() == data, "stdout does not match");
    Ok(())
}

#[tokio::test]
async fn test_unread_session_does_not_block_others() -> Result<()> {
    let mut pair = connect_alice().await?;
    let mut sessions = Vec::new();
    for _ in 0..2 {
        let open_task = spawn_open_session(&pair, kusari::ChannelConfig::default());
        let accept = next_server_channel(&mut pair).await?;
        let server_session = accept.accept_session(kusari::ChannelConfig::default()).await?;
        let session = open_task.await??;
        sessions.push((session, server_session));
    }
    let ((_session_b, mut session_b_rx), (server_b, _server_b_rx)) = sessions.pop().unwrap();
    let ((_session_a, mut session_a_rx), (server_a, _server_a_rx)) = sessions.pop().unwrap();

    // nobody reads session A while its data arrives
    for chunk in [b"aaa1", b"aaa2", b"aaa3"] {
        server_a.send_stdout(Bytes::from_static(chunk)).await?;
    }
    server_b.send_stdout(Bytes::from_static(b"bbbb")).await?;

    let event = tokio::time::timeout(std::time::Duration::from_secs(5), session_b_rx.recv()).await??;
    match event {
        Some(SessionEvent::StdoutData(data)) => ensure!(data.as_ref() == b"bbbb", "received {:?}", data),
        event => bail!("unexpected event {:?}", event),
    }

    let mut stdout_a = BytesMut::new();
    while stdout_a.len() < 12 {
        match session_a_rx.recv().await? {
            Some(SessionEvent::StdoutData(data)) => stdout_a.extend_from_slice(&data),
            event => bail!("unexpected event {:?}", event),
        }
    }
    ensure!(stdout_a.as_ref() == b"aaa1aaa2aaa3", "received {:?}", stdout_a);
    Ok(())
}

#[tokio::test]
async fn test_large_packets() -> Result<()> {
    let mut pair = connect_alice().await?;
    let open_task = spawn_open_session(&pair, kusari::ChannelConfig::default().with(|c| {
        c.recv_window_max = 8 << 20;
        c.recv_packet_len_max = 2 << 20;
    }));
    let accept = next_server_channel(&mut pair).await?;
    let (server_session, _server_session_rx) = accept.accept_session(kusari::ChannelConfig::default()).await?;
    let (_session, mut session_rx) = open_task.await??;

    let data = test_data(1_500_000);
    let send_task = tokio::spawn(enclose!{(data) async move {
        server_session.send_stdout(data).await?;
        server_session.send_eof().await?;
        server_session.close();
        kusari::Result::Ok(())
    }});

    let mut stdout = BytesMut::new();
    while let Some(event) = session_rx.recv().await? {
        if let SessionEvent::StdoutData(chunk) = event {
            ensure!(chunk.len() < 1024 * 1024, "chunk of {} bytes does not fit into a packet", chunk.len());
            stdout.extend_from_slice(&chunk);
        }
    }
    send_task.await??;
    ensure!(stdout.freeze() == data, "stdout does not match");
    Ok(())
}

#[tokio::test]
async fn test_session_requests() -> Result<()> {
    let mut pair = connect_alice().await?;
    let open_task = spawn_open_session(&pair, kusari::ChannelConfig::default());
    let accept = next_server_channel(&mut pair).await?;
    let (server_session, mut server_session_rx) = accept.accept_session(kusari::ChannelConfig::default()).await?;
    let (session, mut session_rx) = open_task.await??;

    let mut modes = kusari::PtyTerminalModes::new();
    modes.set(kusari::codes::terminal_mode::VINTR, 3);
    modes.set(kusari::codes::terminal_mode::ECHO, 1);
    let pty = kusari::PtyRequest {
        term: "xterm-256color".into(),
        width: 80,
        height: 24,
        width_px: 0,
        height_px: 0,
        modes,
    };
    let change = kusari::WindowChange { width: 120, height: 40, width_px: 0, height_px: 0 };

    let (done_tx, done_rx) = oneshot::channel();
    let server_task = tokio::spawn(enclose!{(pty, change) async move {
        let mut received = Vec::new();
        while let Some(event) = server_session_rx.recv().await? {
            let ServerSessionEvent::Request(req) = event else { bail!("unexpected event") };
            let request = req.request.clone();
            received.push((request.clone(), req.wants_reply()));
            match request {
                SessionRequest::Subsystem { .. } => req.reject(),
                SessionRequest::Signal { .. } => break,
                _ => req.accept(),
            }
        }
        ensure!(received == vec![
            (SessionRequest::Pty(pty), true),
            (SessionRequest::Env { name: "LANG".into(), value: "C".into() }, true),
            (SessionRequest::Subsystem { name: "sftp".into() }, true),
            (SessionRequest::Shell, true),
            (SessionRequest::WindowChange(change), false),
            (SessionRequest::Signal { signal_name: "INT".into() }, false),
        ], "received {:?}", received);

        server_session.send_exit_signal(kusari::ExitSignal {
            signal_name: "INT".into(),
            core_dumped: false,
            message: "interrupted".into(),
            message_lang: "".into(),
        })?;
        server_session.close();
        let _ = done_tx.send(());
        Ok(())
    }});

    session.request_pty(pty)?.want_reply().await?;
    session.env(b"LANG", b"C")?.want_reply().await?;
    match session.subsystem("sftp")?.want_reply().await {
        Err(kusari::Error::ChannelReq) => {},
        res => bail!("expected the subsystem to be rejected, got {:?}", res),
    }
    session.shell()?.want_reply().await?;
    session.window_change(change)?;
    session.signal(kusari::codes::signal::INT)?;

    let mut exit_signal = None;
    while let Some(event) = session_rx.recv().await? {
        if let SessionEvent::ExitSignal(signal) = event {
            exit_signal = Some(signal);
        }
    }
    server_task.await??;
    done_rx.await?;
    let exit_signal = exit_signal.ok_or_else(|| anyhow::anyhow!("no exit signal"))?;
    ensure!(exit_signal.signal_name == "INT" && exit_signal.message == "interrupted");
    Ok(())
}

#[tokio::test]
async fn test_replies_in_request_order() -> Result<()> {
    let mut pair = connect_alice().await?;
    let client = pair.client.clone();
    let open_task = tokio::spawn(async move {
        client.open_channel("session".into(), kusari::ChannelConfig::default(), Bytes::new()).await
    });
    let accept = next_server_channel(&mut pair).await?;
    let (_server_channel, mut server_channel_rx) = accept.accept(kusari::ChannelConfig::default()).await?;
    let (channel, _channel_rx, _) = open_task.await??;

    let mut reply_rxs = Vec::new();
    for name in ["first", "second", "third"] {
        let (reply_tx, reply_rx) = oneshot::channel();
        channel.send_request(kusari::ChannelReq {
            request_type: format!("x-{}@kusari", name),
            payload: Bytes::new(),
            reply_tx: Some(reply_tx),
        })?;
        reply_rxs.push(reply_rx);
    }

    let mut reply_txs = Vec::new();
    while reply_txs.len() < 3 {
        match server_channel_rx.recv().await {
            Some(kusari::ChannelEvent::Request(req)) => reply_txs.push(req.reply_tx),
            event => bail!("unexpected event {:?}", event),
        }
    }

    // decide the third request first, the replies must still go out in request order
    let mut reply_txs = reply_txs.into_iter().map(Option::unwrap).collect::<Vec<_>>();
    let third = reply_txs.pop().unwrap();
    let second = reply_txs.pop().unwrap();
    let first = reply_txs.pop().unwrap();
    let _ = third.send(kusari::ChannelReply::Success);
    let _ = first.send(kusari::ChannelReply::Failure);
    drop(second);

    let mut replies = Vec::new();
    for reply_rx in reply_rxs {
        replies.push(reply_rx.await?);
    }
    ensure!(replies == vec![
        kusari::ChannelReply::Failure,
        kusari::ChannelReply::Failure,
        kusari::ChannelReply::Success,
    ], "replies are {:?}", replies);
    Ok(())
}

#[tokio::test]
async fn test_open_rejected() -> Result<()> {
    let mut pair = connect_alice().await?;
    let client = pair.client.clone();
    let open_task = tokio::spawn(async move {
        client.open_channel("x-unknown@kusari".into(), kusari::ChannelConfig::default(), Bytes::new()).await
    });

    let accept = next_server_channel(&mut pair).await?;
    accept.reject(kusari::ChannelOpenError::new(kusari::codes::open::UNKNOWN_CHANNEL_TYPE, "no such type"));
    match open_task.await? {
        Err(kusari::Error::ChannelOpen(err)) => {
            ensure!(err.reason_code == kusari::codes::open::UNKNOWN_CHANNEL_TYPE);
            ensure!(err.description == "no such type");
        },
        res => bail!("expected the open to fail, got {:?}", res.map(|_| ())),
    }

    // dropping the request rejects it as well
    let client = pair.client.clone();
    let open_task = tokio::spawn(async move {
        client.open_channel("x-unknown@kusari".into(), kusari::ChannelConfig::default(), Bytes::new()).await
    });
    drop(next_server_channel(&mut pair).await?);
    match open_task.await? {
        Err(kusari::Error::ChannelOpen(err)) =>
            ensure!(err.reason_code == kusari::codes::open::ADMINISTRATIVELY_PROHIBITED),
        res => bail!("expected the open to fail, got {:?}", res.map(|_| ())),
    }
    Ok(())
}

#[tokio::test]
async fn test_server_opens_channel() -> Result<()> {
    let mut pair = connect_alice().await?;
    let server = pair.server.clone();
    let open_task = tokio::spawn(async move {
        server.open_channel("x-ping@kusari".into(), kusari::ChannelConfig::default(), Bytes::from_static(b"ping")).await
    });

    let accept = match crate::next_client_event(&mut pair).await? {
        kusari::ClientEvent::Channel(accept) => accept,
        event => bail!("unexpected event {:?}", event),
    };
    ensure!(accept.channel_type == "x-ping@kusari" && accept.open_payload.as_ref() == b"ping");
    let (channel, _channel_rx) = accept.accept_with(
        kusari::ChannelConfig::default(), Bytes::from_static(b"pong")).await?;

    let (server_channel, mut server_channel_rx, confirm_payload) = open_task.await??;
    ensure!(confirm_payload.as_ref() == b"pong");

    channel.send_data(Bytes::from_static(b"hello"), kusari::DATA_STANDARD).await?;
    channel.send_eof().await?;
    channel.close();
    match server_channel_rx.recv().await {
        Some(kusari::ChannelEvent::Data(data, kusari::DataType::Standard)) => ensure!(data.as_ref() == b"hello"),
        event => bail!("unexpected event {:?}", event),
    }
    ensure!(matches!(server_channel_rx.recv().await, Some(kusari::ChannelEvent::Eof)));
    ensure!(server_channel_rx.recv().await.is_none(), "channel was not closed");
    server_channel.close();
    Ok(())
}

#[tokio::test]
async fn test_disconnect() -> Result<()> {
    let mut pair = connect(kusari::ClientConfig::default(), server_config())?;
    authenticate_alice(&pair.client).await?;
    pair.client.disconnect(kusari::DisconnectError::by_app())?;

    (&mut pair.client_task).await??;
    match (&mut pair.server_task).await? {
        Err(kusari::Error::PeerDisconnected(err)) =>
            ensure!(err.reason_code == kusari::codes::disconnect::BY_APPLICATION),
        res => bail!("expected the server to see a disconnect, got {:?}", res),
    }
    ensure!(matches!(pair.client.open_session(kusari::ChannelConfig::default()).await,
        Err(kusari::Error::ConnectionLost)));
    Ok(())
}
