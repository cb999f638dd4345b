use bytes::Bytes;
use derivative::Derivative;
use num_bigint_dig::BigUint;
use std::task::Poll;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Error, Result};
use crate::transport::Role;
use crate::util::CryptoRngCore;
use super::{KexAlgo, KexContext, KexInput, KexOutput, Kex, DhGroup, hash};

/// "diffie-hellman-group14-sha256" key exchange from RFC 8268.
pub static DIFFIE_HELLMAN_GROUP14_SHA256: KexAlgo = KexAlgo {
    name: "diffie-hellman-group14-sha256",
    make_kex: |ctx| make_fixed_kex(ctx, DhGroup::group14(), hash::sha256),
};

/// "diffie-hellman-group16-sha512" key exchange from RFC 8268.
pub static DIFFIE_HELLMAN_GROUP16_SHA512: KexAlgo = KexAlgo {
    name: "diffie-hellman-group16-sha512",
    make_kex: |ctx| make_fixed_kex(ctx, DhGroup::group16(), hash::sha512),
};

/// "diffie-hellman-group18-sha512" key exchange from RFC 8268.
pub static DIFFIE_HELLMAN_GROUP18_SHA512: KexAlgo = KexAlgo {
    name: "diffie-hellman-group18-sha512",
    make_kex: |ctx| make_fixed_kex(ctx, DhGroup::group18(), hash::sha512),
};

/// "diffie-hellman-group14-sha1" key exchange from RFC 4253.
pub static DIFFIE_HELLMAN_GROUP14_SHA1: KexAlgo = KexAlgo {
    name: "diffie-hellman-group14-sha1",
    make_kex: |ctx| make_fixed_kex(ctx, DhGroup::group14(), hash::sha1),
};

/// "diffie-hellman-group1-sha1" key exchange from RFC 4253.
///
/// Note that the name refers to "group1", but in fact the key exchange uses group 2.
pub static DIFFIE_HELLMAN_GROUP1_SHA1: KexAlgo = KexAlgo {
    name: "diffie-hellman-group1-sha1",
    make_kex: |ctx| make_fixed_kex(ctx, DhGroup::group2(), hash::sha1),
};

fn make_fixed_kex(
    ctx: KexContext,
    group: DhGroup,
    compute_hash: fn(&[u8]) -> Vec<u8>,
) -> Result<Box<dyn Kex + Send>> {
    let messages = DhMessages { init: msg::KEXDH_INIT, reply: msg::KEXDH_REPLY };
    let exchange = DhExchange::new(ctx.role, group, compute_hash, messages, Bytes::new(), ctx.rng)?;
    Ok(Box::new(FixedGroupKex { exchange }))
}

#[derive(Debug)]
struct FixedGroupKex {
    exchange: DhExchange,
}

impl Kex for FixedGroupKex {
    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        self.exchange.recv_packet(msg_id, payload)
    }

    fn send_packet(&mut self) -> Result<Option<Bytes>> {
        Ok(self.exchange.send_packet())
    }

    fn poll(&mut self, input: KexInput) -> Poll<Result<KexOutput>> {
        self.exchange.poll(input)
    }

    fn compute_hash(&self, data: &[u8]) -> Vec<u8> {
        (self.exchange.compute_hash)(data)
    }
}

/// Message numbers of the init and reply messages, which differ between the fixed-group exchange
/// and the group exchange.
#[derive(Debug, Copy, Clone)]
pub(super) struct DhMessages {
    pub init: u8,
    pub reply: u8,
}

/// Diffie-Hellman exchange in a known group (RFC 4253, section 8), for both sides.
#[derive(Derivative)]
#[derivative(Debug)]
pub(super) struct DhExchange {
    role: Role,
    group: DhGroup,
    #[derivative(Debug = "ignore")]
    pub compute_hash: fn(&[u8]) -> Vec<u8>,
    messages: DhMessages,
    /// Encoded fields that go into the exchange hash between `K_S` and `e`.
    hash_params: Bytes,
    #[derivative(Debug = "ignore")]
    our_private: BigUint,
    our_public: BigUint,
    init_sent: bool,
    /// `e` received from the client (server only).
    client_public: Option<BigUint>,
    /// Reply received from the server (client only).
    server_reply: Option<ServerReply>,
    /// Reply waiting to be sent (server only).
    reply_payload: Option<Bytes>,
    done: bool,
}

#[derive(Debug)]
struct ServerReply {
    server_pubkey: Bytes,
    server_public: BigUint,
    server_exchange_hash_sign: Bytes,
}

impl DhExchange {
    pub fn new(
        role: Role,
        group: DhGroup,
        compute_hash: fn(&[u8]) -> Vec<u8>,
        messages: DhMessages,
        hash_params: Bytes,
        rng: &mut dyn CryptoRngCore,
    ) -> Result<DhExchange> {
        let (our_private, our_public) = group.gen_keypair(rng)?;
        log::debug!("initialized {}-bit Diffie-Hellman exchange", group.bits());
        Ok(DhExchange {
            role, group, compute_hash, messages, hash_params, our_private, our_public,
            init_sent: false,
            client_public: None,
            server_reply: None,
            reply_payload: None,
            done: false,
        })
    }

    pub fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        match self.role {
            Role::Client if msg_id == self.messages.reply => self.recv_reply(payload),
            Role::Server if msg_id == self.messages.init => self.recv_init(payload),
            _ => Err(Error::PacketNotImplemented(msg_id)),
        }
    }

    pub fn send_packet(&mut self) -> Option<Bytes> {
        match self.role {
            Role::Client if !self.init_sent => {
                // RFC 4253, section 8
                let mut payload = PacketEncode::with_msg(self.messages.init);
                payload.put_biguint(&self.our_public);
                self.init_sent = true;
                log::debug!("sending Diffie-Hellman init (message {})", self.messages.init);
                Some(payload.finish())
            },
            Role::Client => None,
            Role::Server => self.reply_payload.take(),
        }
    }

    pub fn poll(&mut self, input: KexInput) -> Poll<Result<KexOutput>> {
        if self.done {
            return Poll::Pending
        }
        match self.role {
            Role::Client if self.server_reply.is_some() => {
                self.done = true;
                Poll::Ready(self.client_exchange(input))
            },
            Role::Server if self.client_public.is_some() => {
                self.done = true;
                Poll::Ready(self.server_exchange(input))
            },
            _ => Poll::Pending,
        }
    }

    fn recv_init(&mut self, payload: &mut PacketDecode) -> Result<()> {
        if self.client_public.is_some() {
            return Err(Error::Protocol("received duplicate Diffie-Hellman init"))
        }
        let client_public = payload.get_biguint()?;
        self.group.check_public(&client_public)?;
        log::debug!("received Diffie-Hellman init");
        self.client_public = Some(client_public);
        Ok(())
    }

    fn recv_reply(&mut self, payload: &mut PacketDecode) -> Result<()> {
        if self.server_reply.is_some() {
            return Err(Error::Protocol("received duplicate Diffie-Hellman reply"))
        }

        let server_pubkey = payload.get_bytes()?;
        let server_public = payload.get_biguint()?;
        let server_exchange_hash_sign = payload.get_bytes()?;
        self.group.check_public(&server_public)?;

        log::debug!("received Diffie-Hellman reply");
        self.server_reply = Some(ServerReply { server_pubkey, server_public, server_exchange_hash_sign });
        Ok(())
    }

    fn client_exchange(&mut self, input: KexInput) -> Result<KexOutput> {
        let Some(reply) = self.server_reply.take() else {
            return Err(Error::KeyExchange("missing Diffie-Hellman reply"))
        };
        let ServerReply { server_pubkey, server_public, server_exchange_hash_sign } = reply;

        let shared_secret = self.group.shared_secret(&server_public, &self.our_private);
        let exchange_hash = self.exchange_hash(
            &input, &server_pubkey, &self.our_public, &server_public, &shared_secret);
        Ok(KexOutput { shared_secret, exchange_hash, server_pubkey, server_exchange_hash_sign })
    }

    fn server_exchange(&mut self, input: KexInput) -> Result<KexOutput> {
        let Some(client_public) = self.client_public.take() else {
            return Err(Error::KeyExchange("missing Diffie-Hellman init"))
        };
        let Some((host_key, _)) = input.host_key else {
            return Err(Error::KeyExchange("server has no host key for the negotiated algorithm"))
        };

        let server_pubkey = host_key.pubkey().encode();
        let shared_secret = self.group.shared_secret(&client_public, &self.our_private);
        let exchange_hash = self.exchange_hash(
            &input, &server_pubkey, &client_public, &self.our_public, &shared_secret);
        let server_exchange_hash_sign = super::sign_exchange_hash(&input, &exchange_hash)?;

        let mut payload = PacketEncode::with_msg(self.messages.reply);
        payload.put_bytes(&server_pubkey);
        payload.put_biguint(&self.our_public);
        payload.put_bytes(&server_exchange_hash_sign);
        self.reply_payload = Some(payload.finish());
        log::debug!("sending Diffie-Hellman reply (message {})", self.messages.reply);

        Ok(KexOutput { shared_secret, exchange_hash, server_pubkey, server_exchange_hash_sign })
    }

    fn exchange_hash(
        &self,
        input: &KexInput,
        server_pubkey: &[u8],
        client_public: &BigUint,
        server_public: &BigUint,
        shared_secret: &BigUint,
    ) -> Vec<u8> {
        let mut data = PacketEncode::new();
        data.put_bytes(input.client_ident);
        data.put_bytes(input.server_ident);
        data.put_bytes(input.client_kex_init);
        data.put_bytes(input.server_kex_init);
        data.put_bytes(server_pubkey);
        data.put_raw(&self.hash_params);
        data.put_biguint(client_public);
        data.put_biguint(server_public);
        data.put_biguint(shared_secret);
        (self.compute_hash)(&data.finish())
    }
}

#[cfg(test)]
mod tests {
    use crate::pubkey::{self, Pubkey};
    use super::super::{GroupExchangeConfig, test_util::run_kex};
    use super::*;

    #[test]
    fn test_both_sides_agree() {
        let gex = GroupExchangeConfig::default();
        for algo in [&DIFFIE_HELLMAN_GROUP14_SHA1, &DIFFIE_HELLMAN_GROUP1_SHA1, &DIFFIE_HELLMAN_GROUP14_SHA256] {
            let (client, server) = run_kex(algo, &gex).unwrap();
            assert_eq!(client.shared_secret, server.shared_secret);
            assert_eq!(client.exchange_hash, server.exchange_hash);
            assert_eq!(client.server_pubkey, server.server_pubkey);

            let server_pubkey = Pubkey::decode(client.server_pubkey.clone()).unwrap();
            (pubkey::SSH_ED25519.verify)(&server_pubkey, &client.exchange_hash,
                client.server_exchange_hash_sign.clone()).unwrap();
        }
    }

    #[test]
    fn test_exchange_hash_len() {
        let gex = GroupExchangeConfig::default();
        let (client, _) = run_kex(&DIFFIE_HELLMAN_GROUP14_SHA1, &gex).unwrap();
        assert_eq!(client.exchange_hash.len(), 20);
        let (client, _) = run_kex(&DIFFIE_HELLMAN_GROUP14_SHA256, &gex).unwrap();
        assert_eq!(client.exchange_hash.len(), 32);
    }

    #[test]
    fn test_reject_invalid_public() {
        let mut rng = <rand_chacha::ChaCha8Rng as rand::SeedableRng>::seed_from_u64(5);
        let messages = DhMessages { init: msg::KEXDH_INIT, reply: msg::KEXDH_REPLY };
        let mut server = DhExchange::new(
            Role::Server, DhGroup::group2(), hash::sha1, messages, Bytes::new(), &mut rng).unwrap();

        let mut payload = PacketEncode::new();
        payload.put_biguint(&BigUint::from(1u32));
        let mut payload = PacketDecode::new(payload.finish());
        assert!(matches!(server.recv_packet(msg::KEXDH_INIT, &mut payload), Err(Error::KeyExchange(_))));
    }
}
