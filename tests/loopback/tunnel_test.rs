use anyhow::{Result, bail, ensure};
use bytes::Bytes;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use kusari::{GlobalReply, GlobalRequest, TunnelAddrs, TunnelEvent};
use crate::{connect_alice, next_client_event, next_server_channel, next_server_event};

async fn echo_tunnel(tunnel: kusari::Tunnel, mut tunnel_rx: kusari::TunnelReceiver) -> Result<()> {
    while let Some(event) = tunnel_rx.recv().await {
        match event {
            TunnelEvent::Data(data) => tunnel.send_data(data).await?,
            TunnelEvent::Eof => {
                tunnel.send_eof().await?;
                tunnel.close();
            },
            event => bail!("unexpected event {:?}", event),
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_direct_tcpip() -> Result<()> {
    let mut pair = connect_alice().await?;
    let client = pair.client.clone();
    let connect_task = tokio::spawn(async move {
        client.connect_tunnel(
            kusari::ChannelConfig::default(),
            ("example.com".into(), 80),
            ("127.0.0.1".into(), 41234),
        ).await
    });

    let accept = next_server_channel(&mut pair).await?;
    ensure!(accept.channel_type == "direct-tcpip");
    ensure!(accept.tunnel_addrs()? == TunnelAddrs {
        target: ("example.com".into(), 80),
        originator: ("127.0.0.1".into(), 41234),
    });
    let (server_tunnel, server_tunnel_rx) = accept.accept_tunnel(kusari::ChannelConfig::default()).await?;
    let echo_task = tokio::spawn(echo_tunnel(server_tunnel, server_tunnel_rx));

    let (tunnel, tunnel_rx) = connect_task.await??;
    let mut stream = kusari::TunnelStream::new(tunnel, tunnel_rx);
    stream.write_all(b"GET / HTTP/1.0\r\n\r\n").await?;
    stream.shutdown().await?;

    let mut echoed = Vec::new();
    stream.read_to_end(&mut echoed).await?;
    ensure!(echoed == b"GET / HTTP/1.0\r\n\r\n", "echoed {:?}", echoed);
    echo_task.await??;
    Ok(())
}

#[tokio::test]
async fn test_tcpip_forward() -> Result<()> {
    let mut pair = connect_alice().await?;
    let client = pair.client.clone();
    let bind_task = tokio::spawn(async move {
        client.bind_tunnel("localhost".into(), 0).await
    });

    match next_server_event(&mut pair).await? {
        kusari::ServerEvent::GlobalRequest(event) => {
            ensure!(event.request == GlobalRequest::TcpipForward { bind_address: "localhost".into(), bind_port: 0 });
            ensure!(event.reply_tx.is_some(), "tcpip-forward must want a reply");
            event.reply(GlobalReply::bound_port(4242));
        },
        event => bail!("unexpected event {:?}", event),
    }
    ensure!(bind_task.await?? == 4242);

    // the server accepted a connection on the bound port and forwards it to us
    let addrs = TunnelAddrs {
        target: ("localhost".into(), 4242),
        originator: ("10.0.0.7".into(), 50000),
    };
    let server = pair.server.clone();
    let forward_task = tokio::spawn({
        let addrs = addrs.clone();
        async move { server.forward_tunnel(kusari::ChannelConfig::default(), addrs).await }
    });

    let accept = match next_client_event(&mut pair).await? {
        kusari::ClientEvent::Channel(accept) => accept,
        event => bail!("unexpected event {:?}", event),
    };
    ensure!(accept.channel_type == "forwarded-tcpip");
    ensure!(accept.tunnel_addrs()? == addrs);
    let (tunnel, tunnel_rx) = accept.accept_tunnel(kusari::ChannelConfig::default()).await?;
    let echo_task = tokio::spawn(echo_tunnel(tunnel, tunnel_rx));

    let (server_tunnel, mut server_tunnel_rx) = forward_task.await??;
    server_tunnel.send_data(Bytes::from_static(b"forwarded")).await?;
    server_tunnel.send_eof().await?;
    let mut echoed = Vec::new();
    while let Some(event) = server_tunnel_rx.recv().await {
        if let TunnelEvent::Data(data) = event {
            echoed.extend_from_slice(&data);
        }
    }
    ensure!(echoed == b"forwarded");
    echo_task.await??;

    // cancel the forwarding
    let client = pair.client.clone();
    let unbind_task = tokio::spawn(async move {
        client.unbind_tunnel("localhost".into(), 4242).await
    });
    match next_server_event(&mut pair).await? {
        kusari::ServerEvent::GlobalRequest(event) => {
            ensure!(event.request == GlobalRequest::CancelTcpipForward { bind_address: "localhost".into(), bind_port: 4242 });
            event.reply(GlobalReply::Success(Bytes::new()));
        },
        event => bail!("unexpected event {:?}", event),
    }
    unbind_task.await??;
    Ok(())
}

#[tokio::test]
async fn test_global_requests() -> Result<()> {
    let mut pair = connect_alice().await?;
    let client = pair.client.clone();
    let request_task = tokio::spawn(async move {
        let replies = ["first", "second", "third"].into_iter().map(|name| {
            client.send_global_request(GlobalRequest::Other {
                request_type: format!("x-{}@kusari", name),
                payload: Bytes::copy_from_slice(name.as_bytes()),
            })
        });
        futures::future::try_join_all(replies).await
    });

    let mut events = Vec::new();
    while events.len() < 3 {
        match next_server_event(&mut pair).await? {
            kusari::ServerEvent::GlobalRequest(event) => events.push(event),
            event => bail!("unexpected event {:?}", event),
        }
    }

    // answer out of order; dropping the second event rejects it
    let third = events.pop().unwrap();
    let second = events.pop().unwrap();
    let first = events.pop().unwrap();
    ensure!(matches!(&first.request, GlobalRequest::Other { payload, .. } if payload.as_ref() == b"first"));
    third.reply(GlobalReply::Success(Bytes::from_static(b"3")));
    drop(second);
    first.reply(GlobalReply::Success(Bytes::from_static(b"1")));

    let results = request_task.await??;
    ensure!(results == vec![
        GlobalReply::Success(Bytes::from_static(b"1")),
        GlobalReply::Failure,
        GlobalReply::Success(Bytes::from_static(b"3")),
    ], "replies are {:?}", results);

    // a notification gets no reply and does not disturb later requests
    pair.client.send_global_notification(&GlobalRequest::Other {
        request_type: "keepalive@kusari".into(),
        payload: Bytes::new(),
    })?;
    match next_server_event(&mut pair).await? {
        kusari::ServerEvent::GlobalRequest(event) => ensure!(event.reply_tx.is_none()),
        event => bail!("unexpected event {:?}", event),
    }
    Ok(())
}
