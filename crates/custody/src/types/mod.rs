mod player_id;
mod player_state;

pub use player_id::PlayerId;
pub use player_state::PlayerState;

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! serde_round_trip {
        ($name:ident, $val:expr) => {
            mod $name {
                use super::*;

                #[test]
                fn msgpack() {
                    let val = $val;
                    let bytes = rmp_serde::to_vec(&val).unwrap();
                    let decoded = rmp_serde::from_slice(&bytes).unwrap();
                    assert_eq!(val, decoded);
                }

                #[test]
                fn json() {
                    let val = $val;
                    let json = serde_json::to_string(&val).unwrap();
                    let decoded = serde_json::from_str(&json).unwrap();
                    assert_eq!(val, decoded);
                }
            }
        };
    }

    serde_round_trip!(player_id, PlayerId::random());
    serde_round_trip!(player_state, PlayerState::new(vec![1u8, 2, 3]));

    #[test]
    fn player_id_byte_round_trip() {
        let id = PlayerId::random();
        let bytes = *id.as_bytes();
        assert_eq!(PlayerId::from_bytes(bytes), id);
    }

    #[test]
    fn nil_player_id() {
        assert!(PlayerId::nil().is_nil());
        assert!(!PlayerId::random().is_nil());
    }

    #[test]
    fn player_id_hash_eq() {
        use std::collections::HashSet;
        let a = PlayerId::random();
        let b = a;
        let c = PlayerId::random();

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
        set.insert(c);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn player_state_accessors() {
        let state = PlayerState::new(vec![9u8, 8, 7]);
        assert_eq!(state.as_bytes(), &[9, 8, 7]);
        assert!(!state.is_empty());
        assert_eq!(state.into_bytes(), vec![9, 8, 7]);
        assert!(PlayerState::new(Vec::new()).is_empty());
    }
}
