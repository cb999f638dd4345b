use hmac::Hmac;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use crate::{Error, Result};
use super::{MacAlgo, MacAlgoVariant, Mac, MacVerified};

/// "hmac-sha2-256" MAC from RFC 6668.
pub static HMAC_SHA2_256: MacAlgo = MacAlgo {
    name: "hmac-sha2-256",
    tag_len: 32,
    key_len: 32,
    variant: MacAlgoVariant::EncryptAndMac,
    make_mac: |key| Ok(Box::new(new_hmac::<Hmac<Sha256>>(key)?)),
};

/// "hmac-sha2-512" MAC from RFC 6668.
pub static HMAC_SHA2_512: MacAlgo = MacAlgo {
    name: "hmac-sha2-512",
    tag_len: 64,
    key_len: 64,
    variant: MacAlgoVariant::EncryptAndMac,
    make_mac: |key| Ok(Box::new(new_hmac::<Hmac<Sha512>>(key)?)),
};

/// "hmac-sha1" MAC from RFC 4253.
pub static HMAC_SHA1: MacAlgo = MacAlgo {
    name: "hmac-sha1",
    tag_len: 20,
    key_len: 20,
    variant: MacAlgoVariant::EncryptAndMac,
    make_mac: |key| Ok(Box::new(new_hmac::<Hmac<Sha1>>(key)?)),
};

/// "hmac-sha2-256-etm@openssh.com" MAC (encrypt-then-MAC variant of [`HMAC_SHA2_256`]).
pub static HMAC_SHA2_256_ETM: MacAlgo = MacAlgo {
    name: "hmac-sha2-256-etm@openssh.com",
    tag_len: 32,
    key_len: 32,
    variant: MacAlgoVariant::EncryptThenMac,
    make_mac: |key| Ok(Box::new(new_hmac::<Hmac<Sha256>>(key)?)),
};

/// "hmac-sha2-512-etm@openssh.com" MAC (encrypt-then-MAC variant of [`HMAC_SHA2_512`]).
pub static HMAC_SHA2_512_ETM: MacAlgo = MacAlgo {
    name: "hmac-sha2-512-etm@openssh.com",
    tag_len: 64,
    key_len: 64,
    variant: MacAlgoVariant::EncryptThenMac,
    make_mac: |key| Ok(Box::new(new_hmac::<Hmac<Sha512>>(key)?)),
};

/// "hmac-sha1-etm@openssh.com" MAC (encrypt-then-MAC variant of [`HMAC_SHA1`]).
pub static HMAC_SHA1_ETM: MacAlgo = MacAlgo {
    name: "hmac-sha1-etm@openssh.com",
    tag_len: 20,
    key_len: 20,
    variant: MacAlgoVariant::EncryptThenMac,
    make_mac: |key| Ok(Box::new(new_hmac::<Hmac<Sha1>>(key)?)),
};

struct HmacMac<H> {
    hmac: H,
}

fn new_hmac<H: hmac::Mac + hmac::digest::KeyInit>(key: &[u8]) -> Result<HmacMac<H>> {
    let hmac = <H as hmac::Mac>::new_from_slice(key)
        .map_err(|_| Error::Crypto("invalid key length for hmac"))?;
    Ok(HmacMac { hmac })
}

impl<H: hmac::Mac + Clone> HmacMac<H> {
    fn keyed(&self, packet_seq: u32, data: &[u8]) -> H {
        let mut hmac = self.hmac.clone();
        hmac.update(&packet_seq.to_be_bytes());
        hmac.update(data);
        hmac
    }
}

impl<H: hmac::Mac + Clone> Mac for HmacMac<H> {
    fn sign(&mut self, packet_seq: u32, data: &[u8], tag: &mut [u8]) {
        let computed = self.keyed(packet_seq, data).finalize().into_bytes();
        tag.copy_from_slice(&computed[..tag.len()]);
    }

    fn verify(&mut self, packet_seq: u32, data: &[u8], tag: &[u8]) -> Result<MacVerified> {
        match self.keyed(packet_seq, data).verify_slice(tag) {
            Ok(()) => Ok(MacVerified::assertion()),
            Err(_) => Err(Error::Mac),
        }
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use hmac::Mac as _;
    use super::*;

    #[test]
    fn test_hmac_sha1_tag() {
        // HMAC-SHA1(key, 00000003 || "abc")
        let key = [0x0b; 20];
        let mut mac = (HMAC_SHA1.make_mac)(&key).unwrap();
        let mut tag = [0; 20];
        mac.sign(3, b"abc", &mut tag);

        let mut expected = Hmac::<Sha1>::new_from_slice(&key).unwrap();
        expected.update(&hex!("00000003"));
        expected.update(b"abc");
        assert_eq!(tag[..], expected.finalize().into_bytes()[..]);
    }

    #[test]
    fn test_verify() {
        for algo in [&HMAC_SHA2_256, &HMAC_SHA2_512, &HMAC_SHA1_ETM] {
            let key = vec![0x55; algo.key_len];
            let mut mac = (algo.make_mac)(&key).unwrap();
            let mut tag = vec![0; algo.tag_len];
            mac.sign(42, b"packet", &mut tag);

            assert!(mac.verify(42, b"packet", &tag).is_ok());
            assert!(mac.verify(43, b"packet", &tag).is_err());
            tag[0] ^= 0x80;
            assert!(matches!(mac.verify(42, b"packet", &tag), Err(Error::Mac)));
        }
    }
}
