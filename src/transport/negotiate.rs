//! Algorithm negotiation, key exchange and key switching (RFC 4253, sections 7 to 9).
use bytes::Bytes;
use num_bigint_dig::BigUint;
use rand::RngCore as _;
use std::future::Future as _;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use crate::auth;
use crate::cipher::{CipherAlgo, CipherAlgoVariant, PacketDecrypt, PacketEncrypt};
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::compress::CompressAlgo;
use crate::error::{Error, Result, AlgoNegotiateError};
use crate::kex::{Kex, KexAlgo, KexContext, KexInput, KexOutput};
use crate::mac::{self, MacAlgo, MacAlgoVariant};
use crate::pubkey::{Pubkey, PubkeyAlgo};
use super::event::{AcceptPubkeySender, Event, PubkeyAccepted};
use super::{Pump, ResultRecvState, Role, TransportState};

#[derive(Default)]
pub(crate) struct NegotiateState {
    state: State,
    our_kex_init: Option<OurKexInit>,
    their_kex_init: Option<TheirKexInit>,
    algos: Option<Algos>,
    kex: Option<Box<dyn Kex + Send>>,
    kex_output: Option<KexOutput>,
    ignore_next_kex_packet: bool,
    pubkey_event: Option<Event>,
    accept_rx: Option<oneshot::Receiver<Result<PubkeyAccepted>>>,
    new_keys_sent: bool,
    new_keys_recvd: bool,
    done_txs: Vec<oneshot::Sender<Result<()>>>,
}

#[derive(Debug, Copy, Clone, Default)]
enum State {
    #[default]
    Idle,
    KexInit,
    Kex,
    AcceptPubkey,
    NewKeys,
    Done,
}

struct OurKexInit {
    payload: Bytes,
    kex_algos: Vec<&'static KexAlgo>,
    pubkey_algos: Vec<&'static PubkeyAlgo>,
    cipher_algos: Vec<&'static CipherAlgo>,
    mac_algos: Vec<&'static MacAlgo>,
    compress_algos: Vec<&'static CompressAlgo>,
}

#[derive(Debug)]
struct TheirKexInit {
    payload: Bytes,
    kex_algos: Vec<String>,
    pubkey_algos: Vec<String>,
    cipher_algos_cts: Vec<String>,
    cipher_algos_stc: Vec<String>,
    mac_algos_cts: Vec<String>,
    mac_algos_stc: Vec<String>,
    compress_algos_cts: Vec<String>,
    compress_algos_stc: Vec<String>,
    first_kex_packet_follows: bool,
}

#[derive(Debug)]
struct Algos {
    kex: &'static KexAlgo,
    pubkey: &'static PubkeyAlgo,
    cipher_cts: &'static CipherAlgo,
    cipher_stc: &'static CipherAlgo,
    mac_cts: &'static MacAlgo,
    mac_stc: &'static MacAlgo,
    compress_cts: &'static CompressAlgo,
    compress_stc: &'static CompressAlgo,
}

/// State for the first key exchange, which starts immediately.
pub(crate) fn init_negotiate() -> NegotiateState {
    NegotiateState { state: State::KexInit, .. NegotiateState::default() }
}

pub(crate) fn pump_negotiate(st: &mut TransportState, cx: &mut Context) -> Result<Pump> {
    match st.negotiate_st.state {
        State::Idle => {
            if st.session_id.is_some() && needs_rekey(st) {
                log::debug!("starting rekey after {} bytes/{} packets sent, {} bytes/{} packets received",
                    st.codec.send_pipe.bytes_since_keys(), st.codec.send_pipe.packets_since_keys(),
                    st.codec.recv_pipe.bytes_since_keys(), st.codec.recv_pipe.packets_since_keys());
                st.negotiate_st.state = State::KexInit;
                return Ok(Pump::Progress)
            }
        },
        State::KexInit => {
            if st.negotiate_st.our_kex_init.is_none() {
                st.negotiate_st.our_kex_init = Some(send_kex_init(st)?);
                return Ok(Pump::Progress)
            }

            if st.negotiate_st.their_kex_init.is_some() {
                let algos = negotiate_algos(st)?;
                st.negotiate_st.ignore_next_kex_packet = is_wrong_guess(st, &algos);
                let kex = (algos.kex.make_kex)(KexContext {
                    role: st.role,
                    rng: &mut st.rng,
                    gex: &st.config.gex,
                })?;
                st.negotiate_st.kex = Some(kex);
                st.negotiate_st.algos = Some(algos);
                st.negotiate_st.state = State::Kex;
                return Ok(Pump::Progress)
            }
        },
        State::Kex => return pump_kex(st),
        State::AcceptPubkey => {
            if let Some(pubkey_event) = st.negotiate_st.pubkey_event.take() {
                match st.event_tx.poll_reserve(cx) {
                    Poll::Ready(reserve_res) => if reserve_res.is_ok() {
                        let _ = st.event_tx.send_item(pubkey_event);
                    },
                    Poll::Pending => {
                        st.negotiate_st.pubkey_event = Some(pubkey_event);
                        return Ok(Pump::Pending)
                    },
                }
            }

            let Some(accept_rx) = st.negotiate_st.accept_rx.as_mut() else {
                return Err(Error::Protocol("no server public key to accept"))
            };
            let _accepted: PubkeyAccepted = pump_ready!(Pin::new(accept_rx).poll(cx))
                .map_err(|err| Error::PubkeyAccept(Box::new(err)))??;
            log::debug!("server public key was accepted");
            st.negotiate_st.accept_rx = None;
            st.negotiate_st.state = State::NewKeys;
            return Ok(Pump::Progress)
        },
        State::NewKeys => {
            if !st.negotiate_st.new_keys_sent {
                send_new_keys(st)?;
                st.negotiate_st.new_keys_sent = true;
                return Ok(Pump::Progress)
            }

            if st.negotiate_st.new_keys_recvd {
                st.negotiate_st.state = State::Done;
                return Ok(Pump::Progress)
            }
        },
        State::Done => {
            log::info!("key exchange finished");
            let done_txs = std::mem::take(&mut st.negotiate_st.done_txs);
            st.negotiate_st = Box::new(NegotiateState::default());
            for done_tx in done_txs {
                let _ = done_tx.send(Ok(()));
            }
            return Ok(Pump::Progress)
        },
    }
    Ok(Pump::Pending)
}

fn pump_kex(st: &mut TransportState) -> Result<Pump> {
    let neg = &mut *st.negotiate_st;
    let (Some(kex), Some(algos), Some(our_kex_init), Some(their_kex_init), Some(their_ident)) = (
        neg.kex.as_mut(), neg.algos.as_ref(), neg.our_kex_init.as_ref(),
        neg.their_kex_init.as_ref(), st.their_ident.as_ref(),
    ) else {
        return Err(Error::Protocol("key exchange is not in progress"))
    };

    if let Some(payload) = kex.send_packet()? {
        st.codec.send_pipe.feed_packet(&payload)?;
        return Ok(Pump::Progress)
    }

    let host_key = match st.role {
        Role::Client => None,
        Role::Server => st.config.host_keys.iter()
            .find(|privkey| privkey.pubkey().supports_algo(algos.pubkey))
            .map(|privkey| (privkey, algos.pubkey)),
    };
    let (client_ident, server_ident, client_kex_init, server_kex_init) = match st.role {
        Role::Client => (&st.our_ident, their_ident, &our_kex_init.payload, &their_kex_init.payload),
        Role::Server => (their_ident, &st.our_ident, &their_kex_init.payload, &our_kex_init.payload),
    };
    let kex_input = KexInput { client_ident, server_ident, client_kex_init, server_kex_init, host_key };
    let kex_output = pump_ready!(kex.poll(kex_input))?;
    log::debug!("finished kex {:?}", algos.kex.name);

    if st.session_id.is_none() {
        st.session_id = Some(kex_output.exchange_hash.clone());
    }

    match st.role {
        Role::Client => {
            let pubkey = Pubkey::decode(kex_output.server_pubkey.clone())?;
            log::debug!("server public key {}", pubkey);
            (algos.pubkey.verify)(&pubkey, &kex_output.exchange_hash,
                kex_output.server_exchange_hash_sign.clone())?;

            let (accept_tx, accept_rx) = oneshot::channel();
            let accept_tx = AcceptPubkeySender { accept_tx };
            neg.pubkey_event = Some(Event::ServerPubkey(pubkey, accept_tx));
            neg.accept_rx = Some(accept_rx);
            neg.state = State::AcceptPubkey;
        },
        Role::Server => {
            // the reply is produced by the final poll and must precede our SSH_MSG_NEWKEYS
            while let Some(payload) = kex.send_packet()? {
                st.codec.send_pipe.feed_packet(&payload)?;
            }
            neg.state = State::NewKeys;
        },
    }
    neg.kex_output = Some(kex_output);
    Ok(Pump::Progress)
}

fn needs_rekey(st: &TransportState) -> bool {
    let (send, recv) = (&st.codec.send_pipe, &st.codec.recv_pipe);
    send.bytes_since_keys() >= st.config.rekey_after_bytes ||
        recv.bytes_since_keys() >= st.config.rekey_after_bytes ||
        send.packets_since_keys() >= st.config.rekey_after_packets ||
        recv.packets_since_keys() >= st.config.rekey_after_packets
}

/// Starts a key exchange (unless one is in progress) and notifies `done_tx` when it finishes.
pub(crate) fn start_kex(st: &mut TransportState, done_tx: Option<oneshot::Sender<Result<()>>>) {
    if let State::Idle = st.negotiate_st.state {
        log::debug!("starting rekey on request");
        st.negotiate_st.state = State::KexInit;
    }
    st.negotiate_st.done_txs.extend(done_tx);
}

/// Returns true if we can send packets of higher layers (there is no key exchange in progress).
pub(crate) fn is_ready(st: &TransportState) -> bool {
    matches!(st.negotiate_st.state, State::Idle)
}

/// Returns true if the peer has started a key exchange and has not yet switched to the new keys.
pub(crate) fn is_peer_in_kex(st: &TransportState) -> bool {
    st.negotiate_st.their_kex_init.is_some() && !st.negotiate_st.new_keys_recvd
}

/// Returns true if the peer has switched to the new keys, but our side of the key exchange has
/// not finished yet (for example, the user has not accepted the server public key).
pub(crate) fn is_peer_ahead(st: &TransportState) -> bool {
    st.negotiate_st.new_keys_recvd
}

pub(crate) fn recv_negotiate_packet(
    st: &mut TransportState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    match msg_id {
        msg::KEXINIT => recv_kex_init(st, payload),
        msg::NEWKEYS => recv_new_keys(st),
        _ => Err(Error::PacketNotImplemented(msg_id)),
    }
}

pub(crate) fn recv_kex_packet(
    st: &mut TransportState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    if st.negotiate_st.ignore_next_kex_packet {
        log::debug!("ignoring kex packet {} after wrong guess of the peer", msg_id);
        st.negotiate_st.ignore_next_kex_packet = false;
        return Ok(None)
    }

    if let Some(kex) = st.negotiate_st.kex.as_mut() {
        kex.recv_packet(msg_id, payload)?;
        Ok(None)
    } else {
        Err(Error::Protocol("received unexpected kex message"))
    }
}

fn send_kex_init(st: &mut TransportState) -> Result<OurKexInit> {
    let kex_algos = st.config.kex_algos.clone();
    let pubkey_algos = match st.role {
        Role::Client => st.config.pubkey_algos.clone(),
        // offer only the algorithms that we can sign with
        Role::Server => st.config.pubkey_algos.iter().copied()
            .filter(|algo| st.config.host_keys.iter().any(|key| key.pubkey().supports_algo(algo)))
            .collect(),
    };
    let cipher_algos = st.config.cipher_algos.clone();
    let mac_algos = st.config.mac_algos.clone();
    let compress_algos = st.config.compress_algos.clone();

    let mut cookie = [0; 16];
    st.rng.fill_bytes(&mut cookie);

    fn names<A: NamedAlgo>(algos: &[&A]) -> Vec<&'static str> {
        algos.iter().map(|algo| algo.name()).collect()
    }

    // RFC 4253, section 7.1
    let mut payload = PacketEncode::with_msg(msg::KEXINIT);
    payload.put_raw(&cookie);
    payload.put_name_list(&names(&kex_algos));
    payload.put_name_list(&names(&pubkey_algos));
    payload.put_name_list(&names(&cipher_algos));
    payload.put_name_list(&names(&cipher_algos));
    payload.put_name_list(&names(&mac_algos));
    payload.put_name_list(&names(&mac_algos));
    payload.put_name_list(&names(&compress_algos));
    payload.put_name_list(&names(&compress_algos));
    payload.put_name_list::<&str>(&[]);
    payload.put_name_list::<&str>(&[]);
    payload.put_bool(false);
    payload.put_u32(0);
    let payload = payload.finish();
    st.codec.send_pipe.feed_packet(&payload)?;
    log::debug!("sending SSH_MSG_KEXINIT");

    Ok(OurKexInit { payload, kex_algos, pubkey_algos, cipher_algos, mac_algos, compress_algos })
}

fn recv_kex_init(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    // RFC 4253, section 7.1
    payload.skip(16)?; // cookie
    let kex_algos = payload.get_name_list()?;
    let pubkey_algos = payload.get_name_list()?;
    let cipher_algos_cts = payload.get_name_list()?;
    let cipher_algos_stc = payload.get_name_list()?;
    let mac_algos_cts = payload.get_name_list()?;
    let mac_algos_stc = payload.get_name_list()?;
    let compress_algos_cts = payload.get_name_list()?;
    let compress_algos_stc = payload.get_name_list()?;
    payload.get_name_list()?; // languages_client_to_server
    payload.get_name_list()?; // languages_server_to_client
    let first_kex_packet_follows = payload.get_bool()?;
    payload.get_u32()?; // reserved

    let kex_init = TheirKexInit {
        payload: Bytes::copy_from_slice(payload.as_original_bytes()),
        kex_algos,
        pubkey_algos,
        cipher_algos_cts,
        cipher_algos_stc,
        mac_algos_cts,
        mac_algos_stc,
        compress_algos_cts,
        compress_algos_stc,
        first_kex_packet_follows,
    };
    log::debug!("received SSH_MSG_KEXINIT: {:?}", kex_init);

    match st.negotiate_st.state {
        State::Idle | State::KexInit if st.negotiate_st.their_kex_init.is_none() => {
            st.negotiate_st.their_kex_init = Some(kex_init);
            st.negotiate_st.state = State::KexInit;
            Ok(None)
        },
        _ => Err(Error::Protocol("received SSH_MSG_KEXINIT during negotiation")),
    }
}

fn negotiate_algos(st: &TransportState) -> Result<Algos> {
    let (Some(our), Some(their)) = (&st.negotiate_st.our_kex_init, &st.negotiate_st.their_kex_init) else {
        return Err(Error::Protocol("negotiation started without both SSH_MSG_KEXINIT"))
    };
    let role = st.role;

    let kex = negotiate_algo(role, &our.kex_algos, &their.kex_algos, "key exchange")?;
    let pubkey = negotiate_algo(role, &our.pubkey_algos, &their.pubkey_algos, "server public key")?;
    let cipher_cts = negotiate_algo(role, &our.cipher_algos, &their.cipher_algos_cts, "cipher client-to-server")?;
    let cipher_stc = negotiate_algo(role, &our.cipher_algos, &their.cipher_algos_stc, "cipher server-to-client")?;

    // AEAD ciphers authenticate the packets themselves, so the mac lists are ignored
    let mac_cts = match cipher_cts.is_aead() {
        true => &mac::INVALID,
        false => negotiate_algo(role, &our.mac_algos, &their.mac_algos_cts, "mac client-to-server")?,
    };
    let mac_stc = match cipher_stc.is_aead() {
        true => &mac::INVALID,
        false => negotiate_algo(role, &our.mac_algos, &their.mac_algos_stc, "mac server-to-client")?,
    };

    let compress_cts = negotiate_algo(role,
        &our.compress_algos, &their.compress_algos_cts, "compression client-to-server")?;
    let compress_stc = negotiate_algo(role,
        &our.compress_algos, &their.compress_algos_stc, "compression server-to-client")?;

    Ok(Algos { kex, pubkey, cipher_cts, cipher_stc, mac_cts, mac_stc, compress_cts, compress_stc })
}

/// Negotiates one algorithm category. The client's list is the preference order on both sides.
fn negotiate_algo<A: NamedAlgo>(
    role: Role,
    our_algos: &[&'static A],
    their_algos: &[String],
    name: &'static str,
) -> Result<&'static A> {
    let our_names = our_algos.iter().map(|algo| algo.name()).collect::<Vec<_>>();
    let negotiated = match role {
        Role::Client => super::negotiate_algo(&our_names, their_algos),
        Role::Server => super::negotiate_algo(their_algos, &our_names),
    };

    if let Some(algo) = negotiated.and_then(|n| our_algos.iter().find(|algo| algo.name() == n)) {
        log::debug!("negotiated algo {:?} for {}", algo.name(), name);
        return Ok(*algo)
    }

    Err(Error::AlgoNegotiate(AlgoNegotiateError {
        algo_name: name.into(),
        our_algos: our_names.into_iter().map(String::from).collect(),
        their_algos: their_algos.into(),
    }))
}

/// RFC 4253, section 7: the peer guessed wrong if its first kex or host key algorithm differs from
/// the negotiated one.
fn is_wrong_guess(st: &TransportState, algos: &Algos) -> bool {
    let Some(their) = st.negotiate_st.their_kex_init.as_ref() else { return false };
    if !their.first_kex_packet_follows {
        return false
    }

    let kex_guess = their.kex_algos.first().map(|name| name.as_str());
    let pubkey_guess = their.pubkey_algos.first().map(|name| name.as_str());
    let wrong = kex_guess != Some(algos.kex.name) || pubkey_guess != Some(algos.pubkey.name);
    if wrong {
        log::debug!("peer guessed kex {:?} and public key {:?} wrongly", kex_guess, pubkey_guess);
    }
    wrong
}

trait NamedAlgo { fn name(&self) -> &'static str; }
impl NamedAlgo for KexAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for CipherAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for MacAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for PubkeyAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for CompressAlgo { fn name(&self) -> &'static str { self.name } }

fn recv_new_keys(st: &mut TransportState) -> ResultRecvState {
    match st.negotiate_st.state {
        State::Kex | State::AcceptPubkey | State::NewKeys => {
            if st.negotiate_st.new_keys_recvd {
                return Err(Error::Protocol("received SSH_MSG_NEWKEYS twice"))
            }
        },
        _ => return Err(Error::Protocol("received unexpected SSH_MSG_NEWKEYS")),
    }

    let Some(algos) = st.negotiate_st.algos.as_ref() else {
        return Err(Error::Protocol("received SSH_MSG_NEWKEYS before negotiation"))
    };
    // we decrypt what the peer encrypts
    let (cipher, mac, compress, letters) = match st.role {
        Role::Client => (algos.cipher_stc, algos.mac_stc, algos.compress_stc, *b"BDF"),
        Role::Server => (algos.cipher_cts, algos.mac_cts, algos.compress_cts, *b"ACE"),
    };

    let keys = derive_keys(st, cipher, mac, letters)?;
    let (decrypt, tag_len) = match &cipher.variant {
        CipherAlgoVariant::Standard(standard) => {
            let decrypt = (standard.make_decrypt)(&keys.cipher_key, &keys.iv)?;
            let mac_impl = (mac.make_mac)(&keys.mac_key)?;
            let decrypt = match mac.variant {
                MacAlgoVariant::EncryptAndMac => PacketDecrypt::EncryptAndMac(decrypt, mac_impl),
                MacAlgoVariant::EncryptThenMac => PacketDecrypt::EncryptThenMac(decrypt, mac_impl),
            };
            (decrypt, mac.tag_len)
        },
        CipherAlgoVariant::Aead(aead) =>
            (PacketDecrypt::Aead((aead.make_decrypt)(&keys.cipher_key, &keys.iv)?), aead.tag_len),
    };
    st.codec.recv_pipe.set_decrypt(decrypt, cipher.block_len, tag_len);

    if compress.delayed && !auth::is_authenticated(st) {
        st.delayed_compress_recv = Some(compress);
        st.codec.recv_pipe.set_decompress(None);
    } else {
        st.delayed_compress_recv = None;
        st.codec.recv_pipe.set_decompress(compress.make_decompress.map(|make| make()));
    }

    log::debug!("received SSH_MSG_NEWKEYS and applied new keys");
    st.negotiate_st.new_keys_recvd = true;
    Ok(None)
}

fn send_new_keys(st: &mut TransportState) -> Result<()> {
    let Some(algos) = st.negotiate_st.algos.as_ref() else {
        return Err(Error::Protocol("sending SSH_MSG_NEWKEYS before negotiation"))
    };
    let (cipher, mac, compress, letters) = match st.role {
        Role::Client => (algos.cipher_cts, algos.mac_cts, algos.compress_cts, *b"ACE"),
        Role::Server => (algos.cipher_stc, algos.mac_stc, algos.compress_stc, *b"BDF"),
    };

    let keys = derive_keys(st, cipher, mac, letters)?;
    let (encrypt, tag_len) = match &cipher.variant {
        CipherAlgoVariant::Standard(standard) => {
            let encrypt = (standard.make_encrypt)(&keys.cipher_key, &keys.iv)?;
            let mac_impl = (mac.make_mac)(&keys.mac_key)?;
            let encrypt = match mac.variant {
                MacAlgoVariant::EncryptAndMac => PacketEncrypt::EncryptAndMac(encrypt, mac_impl),
                MacAlgoVariant::EncryptThenMac => PacketEncrypt::EncryptThenMac(encrypt, mac_impl),
            };
            (encrypt, mac.tag_len)
        },
        CipherAlgoVariant::Aead(aead) =>
            (PacketEncrypt::Aead((aead.make_encrypt)(&keys.cipher_key, &keys.iv)?), aead.tag_len),
    };

    let payload = PacketEncode::with_msg(msg::NEWKEYS);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    st.codec.send_pipe.set_encrypt(encrypt, cipher.block_len, tag_len);

    if compress.delayed && !auth::is_authenticated(st) {
        st.delayed_compress_send = Some(compress);
        st.codec.send_pipe.set_compress(None);
    } else {
        st.delayed_compress_send = None;
        st.codec.send_pipe.set_compress(compress.make_compress.map(|make| make()));
    }

    log::debug!("sent SSH_MSG_NEWKEYS and applied new keys");
    Ok(())
}

struct DirectionKeys {
    iv: Vec<u8>,
    cipher_key: Vec<u8>,
    mac_key: Vec<u8>,
}

/// Derives keys for one direction; `letters` are the letters for the IV, the cipher key and the
/// integrity key.
fn derive_keys(
    st: &TransportState,
    cipher: &CipherAlgo,
    mac: &MacAlgo,
    letters: [u8; 3],
) -> Result<DirectionKeys> {
    let neg = &st.negotiate_st;
    let (Some(kex), Some(kex_output), Some(session_id)) =
        (neg.kex.as_deref(), neg.kex_output.as_ref(), st.session_id.as_ref()) else {
        return Err(Error::Protocol("key exchange has not finished"))
    };

    let hash = |data: &[u8]| kex.compute_hash(data);
    let derive = |letter, len| derive_key(&hash, &kex_output.shared_secret,
        &kex_output.exchange_hash, session_id, letter, len);
    Ok(DirectionKeys {
        iv: derive(letters[0], cipher.iv_len),
        cipher_key: derive(letters[1], cipher.key_len),
        mac_key: derive(letters[2], mac.key_len),
    })
}

/// Derives key material as described in RFC 4253, section 7.2.
///
/// The first block is `HASH(K || H || letter || session_id)`, further blocks are
/// `HASH(K || H || key so far)`.
pub(crate) fn derive_key(
    hash: &dyn Fn(&[u8]) -> Vec<u8>,
    shared_secret: &BigUint,
    exchange_hash: &[u8],
    session_id: &[u8],
    letter: u8,
    key_len: usize,
) -> Vec<u8> {
    let mut prefix = PacketEncode::new();
    prefix.put_biguint(shared_secret);
    prefix.put_raw(exchange_hash);

    let mut key = {
        let mut to_hash = prefix.clone();
        to_hash.put_u8(letter);
        to_hash.put_raw(session_id);
        hash(&to_hash.finish())
    };

    while key.len() < key_len {
        let mut to_hash = prefix.clone();
        to_hash.put_raw(&key);
        key.extend_from_slice(&hash(&to_hash.finish()));
    }

    key.truncate(key_len);
    key
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use crate::kex;
    use super::*;

    fn derive(letter: u8, len: usize) -> Vec<u8> {
        derive_key(&kex::hash::sha256, &BigUint::from(42u32), b"exchange hash", b"session id", letter, len)
    }

    #[test]
    fn test_derive_key() {
        assert_eq!(derive(b'A', 40), hex!(
            "b1cee9f93540d3e3df2881ec6392207720daa856d7d094b346ef2605adcd8059d2e77917484767fa"));
    }

    #[test]
    fn test_derive_key_deterministic() {
        assert_eq!(derive(b'C', 64), derive(b'C', 64));
        assert_eq!(derive(b'C', 16), &derive(b'C', 64)[..16]);
        assert_ne!(derive(b'C', 32), derive(b'D', 32));
        assert!(derive(b'E', 0).is_empty());
    }

    #[test]
    fn test_negotiate_algo_uses_client_preference() {
        let ours = [&kex::CURVE25519_SHA256, &kex::DIFFIE_HELLMAN_GROUP14_SHA256];
        let theirs = vec![
            kex::DIFFIE_HELLMAN_GROUP14_SHA256.name.to_string(),
            kex::CURVE25519_SHA256.name.to_string(),
        ];

        let algo = negotiate_algo(Role::Client, &ours, &theirs, "kex").unwrap();
        assert_eq!(algo.name, kex::CURVE25519_SHA256.name);
        let algo = negotiate_algo(Role::Server, &ours, &theirs, "kex").unwrap();
        assert_eq!(algo.name, kex::DIFFIE_HELLMAN_GROUP14_SHA256.name);
    }

    #[test]
    fn test_negotiate_algo_fails() {
        let ours = [&kex::CURVE25519_SHA256];
        let theirs = vec!["diffie-hellman-group1-sha1".to_string()];
        match negotiate_algo(Role::Client, &ours, &theirs, "key exchange") {
            Err(Error::AlgoNegotiate(err)) => {
                assert_eq!(err.algo_name, "key exchange");
                assert_eq!(err.our_algos, vec!["curve25519-sha256".to_string()]);
                assert_eq!(err.their_algos, theirs);
            },
            res => panic!("unexpected result {:?}", res.map(|algo| algo.name)),
        }
    }
}
