use bytes::Bytes;
use derivative::Derivative;
use num_bigint_dig::BigUint;
use rand_chacha::ChaCha20Rng;
use std::task::Poll;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Error, Result};
use crate::transport::Role;
use crate::util::fork_rng;
use super::{KexAlgo, KexContext, KexInput, KexOutput, Kex, DhGroup, GroupExchangeConfig, hash};
use super::dh::{DhExchange, DhMessages};
use super::groups::choose_group;

/// "diffie-hellman-group-exchange-sha256" key exchange from RFC 4419.
pub static DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256: KexAlgo = KexAlgo {
    name: "diffie-hellman-group-exchange-sha256",
    make_kex: |ctx| make_gex_kex(ctx, hash::sha256),
};

/// "diffie-hellman-group-exchange-sha1" key exchange from RFC 4419.
pub static DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1: KexAlgo = KexAlgo {
    name: "diffie-hellman-group-exchange-sha1",
    make_kex: |ctx| make_gex_kex(ctx, hash::sha1),
};

const MESSAGES: DhMessages = DhMessages { init: msg::KEX_DH_GEX_INIT, reply: msg::KEX_DH_GEX_REPLY };

fn make_gex_kex(ctx: KexContext, compute_hash: fn(&[u8]) -> Vec<u8>) -> Result<Box<dyn Kex + Send>> {
    Ok(Box::new(GexKex {
        role: ctx.role,
        config: ctx.gex.clone(),
        compute_hash,
        rng: fork_rng(ctx.rng)?,
        request_sent: false,
        group_payload: None,
        exchange: None,
    }))
}

#[derive(Derivative)]
#[derivative(Debug)]
struct GexKex {
    role: Role,
    config: GroupExchangeConfig,
    #[derivative(Debug = "ignore")]
    compute_hash: fn(&[u8]) -> Vec<u8>,
    #[derivative(Debug = "ignore")]
    rng: ChaCha20Rng,
    request_sent: bool,
    /// `SSH_MSG_KEX_DH_GEX_GROUP` waiting to be sent (server only).
    group_payload: Option<Bytes>,
    /// Once the group is known, the rest is a plain Diffie-Hellman exchange.
    exchange: Option<DhExchange>,
}

/// Sizes requested by the client; `min` and `max` are missing in the old request.
#[derive(Debug, Copy, Clone)]
struct Request {
    min: Option<u32>,
    preferred: u32,
    max: Option<u32>,
}

impl Request {
    fn encode_hash_params(&self, group: &DhGroup) -> Bytes {
        let mut params = PacketEncode::new();
        if let Some(min) = self.min {
            params.put_u32(min);
        }
        params.put_u32(self.preferred);
        if let Some(max) = self.max {
            params.put_u32(max);
        }
        params.put_biguint(&group.p);
        params.put_biguint(&group.g);
        params.finish()
    }
}

impl GexKex {
    fn recv_request(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        // RFC 4419, sections 3 and 5
        let request = if msg_id == msg::KEX_DH_GEX_REQUEST {
            let min = payload.get_u32()?;
            let preferred = payload.get_u32()?;
            let max = payload.get_u32()?;
            if min > max {
                return Err(Error::KeyExchange("client requested an empty range of group sizes"))
            }
            Request { min: Some(min), preferred, max: Some(max) }
        } else {
            Request { min: None, preferred: payload.get_u32()?, max: None }
        };
        log::debug!("received group exchange request {:?}", request);

        let group = choose_group(
            &self.config.groups,
            request.min.unwrap_or(0),
            request.preferred,
            request.max.unwrap_or(u32::MAX),
        ).ok_or(Error::KeyExchange("no group of the requested size is available"))?.clone();
        log::debug!("chose {}-bit group for group exchange", group.bits());

        let mut group_payload = PacketEncode::with_msg(msg::KEX_DH_GEX_GROUP);
        group_payload.put_biguint(&group.p);
        group_payload.put_biguint(&group.g);
        self.group_payload = Some(group_payload.finish());

        let hash_params = request.encode_hash_params(&group);
        self.exchange = Some(DhExchange::new(
            Role::Server, group, self.compute_hash, MESSAGES, hash_params, &mut self.rng)?);
        Ok(())
    }

    fn recv_group(&mut self, payload: &mut PacketDecode) -> Result<()> {
        let p = payload.get_biguint()?;
        let g = payload.get_biguint()?;
        let group = DhGroup::new(g, p);

        let bits = group.bits();
        if bits < self.config.min_bits || bits > self.config.max_bits {
            log::debug!("server sent {}-bit group, we requested {}..={}",
                bits, self.config.min_bits, self.config.max_bits);
            return Err(Error::KeyExchange("server sent a group with unacceptable size"))
        }
        if group.g <= BigUint::from(1u32) || group.g >= &group.p - 1u32 {
            return Err(Error::KeyExchange("server sent a group with invalid generator"))
        }
        log::debug!("received {}-bit group for group exchange", bits);

        let request = Request {
            min: Some(self.config.min_bits),
            preferred: self.config.preferred_bits,
            max: Some(self.config.max_bits),
        };
        let hash_params = request.encode_hash_params(&group);
        self.exchange = Some(DhExchange::new(
            Role::Client, group, self.compute_hash, MESSAGES, hash_params, &mut self.rng)?);
        Ok(())
    }
}

impl Kex for GexKex {
    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        if let Some(exchange) = self.exchange.as_mut() {
            return exchange.recv_packet(msg_id, payload)
        }
        match self.role {
            Role::Server if msg_id == msg::KEX_DH_GEX_REQUEST || msg_id == msg::KEX_DH_GEX_REQUEST_OLD =>
                self.recv_request(msg_id, payload),
            Role::Client if self.request_sent && msg_id == msg::KEX_DH_GEX_GROUP =>
                self.recv_group(payload),
            _ => Err(Error::PacketNotImplemented(msg_id)),
        }
    }

    fn send_packet(&mut self) -> Result<Option<Bytes>> {
        if self.role == Role::Client && !self.request_sent {
            let mut payload = PacketEncode::with_msg(msg::KEX_DH_GEX_REQUEST);
            payload.put_u32(self.config.min_bits);
            payload.put_u32(self.config.preferred_bits);
            payload.put_u32(self.config.max_bits);
            self.request_sent = true;
            log::debug!("sending group exchange request for {}..={} bits",
                self.config.min_bits, self.config.max_bits);
            return Ok(Some(payload.finish()))
        }
        if let Some(payload) = self.group_payload.take() {
            return Ok(Some(payload))
        }
        Ok(self.exchange.as_mut().and_then(|exchange| exchange.send_packet()))
    }

    fn poll(&mut self, input: KexInput) -> Poll<Result<KexOutput>> {
        match self.exchange.as_mut() {
            Some(exchange) => exchange.poll(input),
            None => Poll::Pending,
        }
    }

    fn compute_hash(&self, data: &[u8]) -> Vec<u8> {
        (self.compute_hash)(data)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;
    use super::super::test_util::run_kex;
    use super::*;

    #[test]
    fn test_both_sides_agree() {
        let gex = GroupExchangeConfig::default();
        for algo in [&DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256, &DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1] {
            let (client, server) = run_kex(algo, &gex).unwrap();
            assert_eq!(client.shared_secret, server.shared_secret);
            assert_eq!(client.exchange_hash, server.exchange_hash);
        }
    }

    #[test]
    fn test_no_acceptable_group() {
        let gex = GroupExchangeConfig {
            min_bits: 3000,
            preferred_bits: 3072,
            max_bits: 3500,
            ..GroupExchangeConfig::default()
        };
        assert!(matches!(run_kex(&DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256, &gex), Err(Error::KeyExchange(_))));
    }

    fn make_kex(role: Role, gex: &GroupExchangeConfig) -> Box<dyn Kex + Send> {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(3);
        (DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256.make_kex)(KexContext { role, rng: &mut rng, gex }).unwrap()
    }

    #[test]
    fn test_server_old_request() {
        let gex = GroupExchangeConfig::default();
        let mut server = make_kex(Role::Server, &gex);

        let mut request = PacketEncode::new();
        request.put_u32(4000);
        let mut request = PacketDecode::new(request.finish());
        server.recv_packet(msg::KEX_DH_GEX_REQUEST_OLD, &mut request).unwrap();

        let mut group = PacketDecode::new(server.send_packet().unwrap().unwrap());
        assert_eq!(group.get_u8().unwrap(), msg::KEX_DH_GEX_GROUP);
        let p = group.get_biguint().unwrap();
        assert_eq!(p, DhGroup::group16().p);
    }

    #[test]
    fn test_server_rejects_inverted_range() {
        let gex = GroupExchangeConfig::default();
        let mut server = make_kex(Role::Server, &gex);

        let mut request = PacketEncode::new();
        request.put_u32(4096);
        request.put_u32(2048);
        request.put_u32(1024);
        let mut request = PacketDecode::new(request.finish());
        assert!(matches!(server.recv_packet(msg::KEX_DH_GEX_REQUEST, &mut request), Err(Error::KeyExchange(_))));
    }

    #[test]
    fn test_client_rejects_small_group() {
        let gex = GroupExchangeConfig { min_bits: 2048, ..GroupExchangeConfig::default() };
        let mut client = make_kex(Role::Client, &gex);
        assert!(client.send_packet().unwrap().is_some());

        let group2 = DhGroup::group2();
        let mut group = PacketEncode::new();
        group.put_biguint(&group2.p);
        group.put_biguint(&group2.g);
        let mut group = PacketDecode::new(group.finish());
        assert!(matches!(client.recv_packet(msg::KEX_DH_GEX_GROUP, &mut group), Err(Error::KeyExchange(_))));
    }
}
