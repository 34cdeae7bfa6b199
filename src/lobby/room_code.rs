//! Short shareable room codes

use rand::Rng;

use crate::ws::protocol::RoomId;

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Random `RoomId::LEN`-character uppercase base36 code
pub fn generate_room_code<R: Rng + ?Sized>(rng: &mut R) -> RoomId {
    let code: String = (0..RoomId::LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    RoomId::from_generated(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn codes_are_uppercase_base36() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..200 {
            let code = generate_room_code(&mut rng);
            assert_eq!(code.as_str().len(), RoomId::LEN);
            assert!(code
                .as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
            assert_eq!(RoomId::parse(code.as_str()).as_ref(), Some(&code));
        }
    }
}
