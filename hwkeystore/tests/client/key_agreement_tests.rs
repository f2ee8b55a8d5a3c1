// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use hwkeystore::error::Error;
use hwkeystore::keystore::KeyStoreService;
use hwkeystore_test_utils::authorizations::ParamSetBuilder;
use hwkeystore_test_utils::key_generations::{self, map_ks_error};
use hwkeystore_test_utils::{setup, test_process};
use openssl::derive::Deriver;
use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};

fn ec_peer(nid: Nid) -> PKey<Private> {
    let group = EcGroup::from_curve_name(nid).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

/// Both sides of an agreement compute the same secret from the other's public key.
fn peer_secret(peer: &PKey<Private>, public_key_der: &[u8]) -> Vec<u8> {
    let public = PKey::public_key_from_der(public_key_der).unwrap();
    let mut deriver = Deriver::new(peer).unwrap();
    deriver.set_peer(&public).unwrap();
    deriver.derive_to_vec().unwrap()
}

/// ECDH between a P-256 key of the key store and an openssl key.
#[test]
fn hwkeystore_ec_key_agreement() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_ec_agree_key(&ks, &process, 256).unwrap();
    let peer = ec_peer(Nid::X9_62_PRIME256V1);

    let peer_der = peer.public_key_to_der().unwrap();
    let secret =
        ks.agree_key(&blob, &process, &ParamSetBuilder::new().build(), &peer_der).unwrap();
    assert_eq!(secret.len(), 32);

    let public_key = ks.export_public_key(&blob, &process).unwrap();
    assert_eq!(&secret[..], &peer_secret(&peer, &public_key)[..]);
}

/// X25519 between a key of the key store and an openssl key.
#[test]
fn hwkeystore_x25519_key_agreement() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_x25519_key(&ks, &process).unwrap();
    let peer = PKey::generate_x25519().unwrap();

    let peer_der = peer.public_key_to_der().unwrap();
    let secret =
        ks.agree_key(&blob, &process, &ParamSetBuilder::new().build(), &peer_der).unwrap();

    let public_key = ks.export_public_key(&blob, &process).unwrap();
    assert_eq!(&secret[..], &peer_secret(&peer, &public_key)[..]);
}

/// Try to agree with a peer key on another curve. Test should fail with `CryptoEngineError`.
#[test]
fn hwkeystore_ec_key_agreement_curve_mismatch_fail() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_ec_agree_key(&ks, &process, 256).unwrap();
    let peer = ec_peer(Nid::SECP384R1);
    let result = map_ks_error(ks.agree_key(
        &blob,
        &process,
        &ParamSetBuilder::new().build(),
        &peer.public_key_to_der().unwrap(),
    ));
    assert_eq!(Err(Error::CryptoEngineError), result.map(|_| ()));
}

/// Try to agree with a malformed peer key. Test should fail with `InvalidArgument`.
#[test]
fn hwkeystore_key_agreement_malformed_peer_fail() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_x25519_key(&ks, &process).unwrap();
    let result =
        map_ks_error(ks.agree_key(&blob, &process, &ParamSetBuilder::new().build(), &[0x30, 0x03]));
    assert_eq!(Err(Error::InvalidArgument), result.map(|_| ()));
}

/// Try to agree with a signing key. Test should fail with `InvalidArgument`.
#[test]
fn hwkeystore_key_agreement_with_signing_key_fail() {
    let ks = setup();
    let process = test_process();
    let blob = key_generations::generate_ec_p256_signing_key(&ks, &process).unwrap();
    let peer = ec_peer(Nid::X9_62_PRIME256V1);
    let result = map_ks_error(ks.agree_key(
        &blob,
        &process,
        &ParamSetBuilder::new().build(),
        &peer.public_key_to_der().unwrap(),
    ));
    assert_eq!(Err(Error::InvalidArgument), result.map(|_| ()));
}
