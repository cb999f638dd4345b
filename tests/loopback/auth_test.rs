use anyhow::{Result, bail, ensure};
use kusari::{AuthMethodRequest, AuthNoneResult, AuthPasswordResult, AuthPubkeyResult};
use crate::{USERNAME, PASSWORD, alice_privkey, connect, ed25519_privkey, server_config};

#[tokio::test]
async fn test_password() -> Result<()> {
    let pair = connect(kusari::ClientConfig::default(), server_config())?;
    ensure!(!pair.client.is_authenticated()?);

    match pair.client.auth_password(USERNAME.into(), "wrong".into()).await? {
        AuthPasswordResult::Failure(failure) => {
            ensure!(!failure.partial_success);
            ensure!(failure.methods_can_continue.contains(&"password".to_string()));
            ensure!(failure.methods_can_continue.contains(&"publickey".to_string()));
        },
        res => bail!("wrong password was accepted: {:?}", res),
    }
    ensure!(!pair.client.is_authenticated()?);

    match pair.client.auth_password(USERNAME.into(), PASSWORD.into()).await? {
        AuthPasswordResult::Success => {},
        res => bail!("password was rejected: {:?}", res),
    }
    ensure!(pair.client.is_authenticated()?);
    ensure!(pair.server.is_authenticated()?);
    Ok(())
}

#[tokio::test]
async fn test_none_is_rejected() -> Result<()> {
    let pair = connect(kusari::ClientConfig::default(), server_config())?;
    match pair.client.auth_none(USERNAME.into()).await? {
        AuthNoneResult::Failure(failure) =>
            ensure!(!failure.methods_can_continue.contains(&"none".to_string())),
        res => bail!("none method was accepted: {:?}", res),
    }
    ensure!(!pair.client.is_authenticated()?);
    Ok(())
}

#[tokio::test]
async fn test_pubkey() -> Result<()> {
    let pair = connect(kusari::ClientConfig::default(), server_config())?;
    let alice = alice_privkey();
    let mallory = ed25519_privkey(0x66);

    ensure!(pair.client.check_pubkey(USERNAME.into(), alice.pubkey(), &kusari::pubkey::SSH_ED25519).await?);
    ensure!(!pair.client.check_pubkey(USERNAME.into(), mallory.pubkey(), &kusari::pubkey::SSH_ED25519).await?);
    ensure!(!pair.client.is_authenticated()?, "probing a key must not authenticate");

    match pair.client.auth_pubkey(USERNAME.into(), mallory, &kusari::pubkey::SSH_ED25519).await? {
        AuthPubkeyResult::Failure(_) => {},
        res => bail!("unknown key was accepted: {:?}", res),
    }
    match pair.client.auth_pubkey(USERNAME.into(), alice, &kusari::pubkey::SSH_ED25519).await? {
        AuthPubkeyResult::Success => {},
        res => bail!("alice's key was rejected: {:?}", res),
    }
    ensure!(pair.client.is_authenticated()?);
    Ok(())
}

#[tokio::test]
async fn test_pubkey_wrong_algo() -> Result<()> {
    let pair = connect(kusari::ClientConfig::default(), server_config())?;
    match pair.client.auth_pubkey(USERNAME.into(), alice_privkey(), &kusari::pubkey::RSA_SHA2_256).await {
        Err(kusari::Error::PrivkeyFormat) => Ok(()),
        res => bail!("expected a PrivkeyFormat error, got {:?}", res),
    }
}

#[tokio::test]
async fn test_policy_all() -> Result<()> {
    let config = server_config().with(|c| {
        c.auth_policy = kusari::AuthPolicy::All(vec!["password".into(), "publickey".into()]);
    });
    let pair = connect(kusari::ClientConfig::default(), config)?;

    match pair.client.auth_password(USERNAME.into(), PASSWORD.into()).await? {
        AuthPasswordResult::Failure(failure) => {
            ensure!(failure.partial_success, "password should be a partial success");
            ensure!(failure.methods_can_continue == vec!["publickey".to_string()],
                "methods that can continue are {:?}", failure.methods_can_continue);
        },
        res => bail!("password alone was enough: {:?}", res),
    }
    ensure!(!pair.client.is_authenticated()?);

    match pair.client.auth_pubkey(USERNAME.into(), alice_privkey(), &kusari::pubkey::SSH_ED25519).await? {
        AuthPubkeyResult::Success => {},
        res => bail!("second factor was rejected: {:?}", res),
    }
    ensure!(pair.client.is_authenticated()?);
    Ok(())
}

#[tokio::test]
async fn test_requests_carry_credentials() -> Result<()> {
    crate::init_log();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, mut client_rx, client_fut) = kusari::Client::open(client_io, kusari::ClientConfig::default())?;
    let (_server, mut server_rx, server_fut) = kusari::Server::accept(server_io, server_config())?;
    let client_task = tokio::spawn(client_fut);
    let server_task = tokio::spawn(server_fut);
    tokio::spawn(async move {
        while let Some(event) = client_rx.recv().await {
            if let kusari::ClientEvent::ServerPubkey(_, accept_tx) = event {
                accept_tx.accept();
            }
        }
    });

    let auth_task = tokio::spawn(async move {
        client.auth_password("bob".into(), "hunter2".into()).await
    });
    let request = match server_rx.recv().await {
        Some(kusari::ServerEvent::AuthRequest(request)) => request,
        event => bail!("unexpected event {:?}", event),
    };
    ensure!(request.username == "bob");
    ensure!(matches!(&request.method, AuthMethodRequest::Password(password) if password == "hunter2"));
    request.accept();
    ensure!(matches!(auth_task.await??, AuthPasswordResult::Success));

    client_task.abort();
    server_task.abort();
    Ok(())
}

#[tokio::test]
async fn test_too_many_attempts() -> Result<()> {
    let config = server_config().with(|c| c.max_auth_attempts = 2);
    let mut pair = connect(kusari::ClientConfig::default(), config)?;
    for _ in 0..2 {
        match pair.client.auth_password(USERNAME.into(), "wrong".into()).await {
            Ok(AuthPasswordResult::Failure(_)) | Err(_) => {},
            res => bail!("wrong password was accepted: {:?}", res),
        }
    }

    match (&mut pair.server_task).await? {
        Err(kusari::Error::AuthAttempts) => Ok(()),
        res => bail!("expected the server to give up, got {:?}", res),
    }
}
