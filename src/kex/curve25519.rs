use bytes::Bytes;
use derivative::Derivative;
use num_bigint_dig::BigUint;
use std::task::Poll;
use x25519_dalek::{EphemeralSecret, PublicKey};
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Error, Result};
use crate::transport::Role;
use crate::util::fork_rng;
use super::{KexAlgo, KexContext, KexInput, KexOutput, Kex, hash};

/// "curve25519-sha256" key exchange from RFC 8731.
pub static CURVE25519_SHA256: KexAlgo = KexAlgo {
    name: "curve25519-sha256",
    make_kex: make_curve25519_kex,
};

/// "curve25519-sha256@libssh.org" key exchange, the same algorithm under its original name.
pub static CURVE25519_SHA256_LIBSSH: KexAlgo = KexAlgo {
    name: "curve25519-sha256@libssh.org",
    make_kex: make_curve25519_kex,
};

fn make_curve25519_kex(ctx: KexContext) -> Result<Box<dyn Kex + Send>> {
    let mut rng = fork_rng(ctx.rng)?;
    let our_secret = EphemeralSecret::random_from_rng(&mut rng);
    let our_public = PublicKey::from(&our_secret);
    Ok(Box::new(Curve25519Kex {
        role: ctx.role,
        our_secret: Some(our_secret),
        our_public,
        init_sent: false,
        their_init: None,
        reply: None,
        reply_payload: None,
    }))
}

#[derive(Derivative)]
#[derivative(Debug)]
struct Curve25519Kex {
    role: Role,
    #[derivative(Debug = "ignore")]
    our_secret: Option<EphemeralSecret>,
    our_public: PublicKey,
    init_sent: bool,
    /// `Q_C` received from the client (server only).
    their_init: Option<PublicKey>,
    /// Reply received from the server (client only).
    reply: Option<EcdhReply>,
    /// Reply waiting to be sent (server only).
    reply_payload: Option<Bytes>,
}

#[derive(Debug)]
struct EcdhReply {
    server_pubkey: Bytes,
    server_public: PublicKey,
    server_exchange_hash_sign: Bytes,
}

impl Kex for Curve25519Kex {
    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        match (self.role, msg_id) {
            (Role::Client, msg::KEX_ECDH_REPLY) => self.recv_ecdh_reply(payload),
            (Role::Server, msg::KEX_ECDH_INIT) => self.recv_ecdh_init(payload),
            _ => Err(Error::PacketNotImplemented(msg_id)),
        }
    }

    fn send_packet(&mut self) -> Result<Option<Bytes>> {
        match self.role {
            Role::Client if !self.init_sent => {
                // RFC 5656, section 4
                let mut payload = PacketEncode::with_msg(msg::KEX_ECDH_INIT);
                payload.put_bytes(self.our_public.as_bytes());
                self.init_sent = true;
                log::debug!("sending SSH_MSG_KEX_ECDH_INIT");
                Ok(Some(payload.finish()))
            },
            Role::Client => Ok(None),
            Role::Server => Ok(self.reply_payload.take()),
        }
    }

    fn poll(&mut self, input: KexInput) -> Poll<Result<KexOutput>> {
        if self.our_secret.is_none() {
            return Poll::Pending
        }
        match self.role {
            Role::Client if self.reply.is_some() => Poll::Ready(self.client_exchange(input)),
            Role::Server if self.their_init.is_some() => Poll::Ready(self.server_exchange(input)),
            _ => Poll::Pending,
        }
    }

    fn compute_hash(&self, data: &[u8]) -> Vec<u8> {
        hash::sha256(data)
    }
}

impl Curve25519Kex {
    fn recv_ecdh_init(&mut self, payload: &mut PacketDecode) -> Result<()> {
        if self.their_init.is_some() {
            return Err(Error::Protocol("received duplicate SSH_MSG_KEX_ECDH_INIT"))
        }
        let client_public = decode_public(payload)?;
        log::debug!("received SSH_MSG_KEX_ECDH_INIT");
        self.their_init = Some(client_public);
        Ok(())
    }

    fn recv_ecdh_reply(&mut self, payload: &mut PacketDecode) -> Result<()> {
        if self.reply.is_some() {
            return Err(Error::Protocol("received duplicate SSH_MSG_KEX_ECDH_REPLY"))
        }
        let server_pubkey = payload.get_bytes()?;
        let server_public = decode_public(payload)?;
        let server_exchange_hash_sign = payload.get_bytes()?;
        log::debug!("received SSH_MSG_KEX_ECDH_REPLY");
        self.reply = Some(EcdhReply { server_pubkey, server_public, server_exchange_hash_sign });
        Ok(())
    }

    fn client_exchange(&mut self, input: KexInput) -> Result<KexOutput> {
        let (Some(our_secret), Some(reply)) = (self.our_secret.take(), self.reply.take()) else {
            return Err(Error::KeyExchange("curve25519 exchange is not complete"))
        };
        let EcdhReply { server_pubkey, server_public, server_exchange_hash_sign } = reply;

        let shared_secret = agree(our_secret, &server_public)?;
        let exchange_hash = exchange_hash(
            &input, &server_pubkey, &self.our_public, &server_public, &shared_secret);
        Ok(KexOutput { shared_secret, exchange_hash, server_pubkey, server_exchange_hash_sign })
    }

    fn server_exchange(&mut self, input: KexInput) -> Result<KexOutput> {
        let (Some(our_secret), Some(client_public)) = (self.our_secret.take(), self.their_init.take()) else {
            return Err(Error::KeyExchange("curve25519 exchange is not complete"))
        };
        let Some((host_key, _)) = input.host_key else {
            return Err(Error::KeyExchange("server has no host key for the negotiated algorithm"))
        };

        let server_pubkey = host_key.pubkey().encode();
        let shared_secret = agree(our_secret, &client_public)?;
        let exchange_hash = exchange_hash(
            &input, &server_pubkey, &client_public, &self.our_public, &shared_secret);
        let server_exchange_hash_sign = super::sign_exchange_hash(&input, &exchange_hash)?;

        let mut payload = PacketEncode::with_msg(msg::KEX_ECDH_REPLY);
        payload.put_bytes(&server_pubkey);
        payload.put_bytes(self.our_public.as_bytes());
        payload.put_bytes(&server_exchange_hash_sign);
        self.reply_payload = Some(payload.finish());
        log::debug!("sending SSH_MSG_KEX_ECDH_REPLY");

        Ok(KexOutput { shared_secret, exchange_hash, server_pubkey, server_exchange_hash_sign })
    }
}

fn decode_public(payload: &mut PacketDecode) -> Result<PublicKey> {
    let bytes = payload.get_bytes()?;
    let bytes: [u8; 32] = bytes.as_ref().try_into()
        .map_err(|_| Error::KeyExchange("curve25519 public key has invalid length"))?;
    Ok(PublicKey::from(bytes))
}

fn agree(our_secret: EphemeralSecret, their_public: &PublicKey) -> Result<BigUint> {
    let shared = our_secret.diffie_hellman(their_public);
    // RFC 8731, section 3: reject the all-zero shared secret
    if !shared.was_contributory() {
        return Err(Error::KeyExchange("curve25519 shared secret is not contributory"))
    }
    Ok(BigUint::from_bytes_be(shared.as_bytes()))
}

fn exchange_hash(
    input: &KexInput,
    server_pubkey: &[u8],
    client_public: &PublicKey,
    server_public: &PublicKey,
    shared_secret: &BigUint,
) -> Vec<u8> {
    let mut data = PacketEncode::new();
    data.put_bytes(input.client_ident);
    data.put_bytes(input.server_ident);
    data.put_bytes(input.client_kex_init);
    data.put_bytes(input.server_kex_init);
    data.put_bytes(server_pubkey);
    data.put_bytes(client_public.as_bytes());
    data.put_bytes(server_public.as_bytes());
    data.put_biguint(shared_secret);
    hash::sha256(&data.finish())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;
    use super::super::{GroupExchangeConfig, test_util::run_kex};
    use super::*;

    #[test]
    fn test_both_sides_agree() {
        let gex = GroupExchangeConfig::default();
        for algo in [&CURVE25519_SHA256, &CURVE25519_SHA256_LIBSSH] {
            let (client, server) = run_kex(algo, &gex).unwrap();
            assert_eq!(client.shared_secret, server.shared_secret);
            assert_eq!(client.exchange_hash, server.exchange_hash);
            assert_eq!(client.server_exchange_hash_sign, server.server_exchange_hash_sign);
        }
    }

    #[test]
    fn test_reject_low_order_point() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(9);
        let gex = GroupExchangeConfig::default();
        let mut server = make_curve25519_kex(KexContext { role: Role::Server, rng: &mut rng, gex: &gex }).unwrap();

        let mut init = PacketEncode::new();
        init.put_bytes(&[0; 32]);
        let mut init = PacketDecode::new(init.finish());
        server.recv_packet(msg::KEX_ECDH_INIT, &mut init).unwrap();

        let host_key = crate::pubkey::Privkey::Ed25519(
            ed25519_dalek::SigningKey::from_bytes(&[1; 32]).into());
        let input = KexInput {
            client_ident: b"SSH-2.0-a",
            server_ident: b"SSH-2.0-b",
            client_kex_init: b"",
            server_kex_init: b"",
            host_key: Some((&host_key, &crate::pubkey::SSH_ED25519)),
        };
        assert!(matches!(server.poll(input), Poll::Ready(Err(Error::KeyExchange(_)))));
    }

    #[test]
    fn test_reject_short_public() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(9);
        let gex = GroupExchangeConfig::default();
        let mut server = make_curve25519_kex(KexContext { role: Role::Server, rng: &mut rng, gex: &gex }).unwrap();

        let mut init = PacketEncode::new();
        init.put_bytes(&[5; 31]);
        let mut init = PacketDecode::new(init.finish());
        assert!(matches!(server.recv_packet(msg::KEX_ECDH_INIT, &mut init), Err(Error::KeyExchange(_))));
    }
}
