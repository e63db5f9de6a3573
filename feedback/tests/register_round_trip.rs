//! Everything the store writes must come back unchanged through the reader.

use feedback::{FeedbackError, FeedbackReader, ParameterStore, PidParams, RegisterBank};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rpu_proto::{decode_float_pair, RegisterIndex};

#[test]
fn test_pid_and_limits_survive_the_bank() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let mut bank = RegisterBank::new();

    for _ in 0..200 {
        let params = PidParams::new(
            rng.random_range(0.0f32..0.1),
            rng.random_range(-1e4f32..1e4),
            rng.random_range(-1e3f32..1e3),
            rng.random_range(0.0f32..1e5),
        );
        let low = rng.random_range(0.0f32..0.5);
        let high = rng.random_range(0.5f32..=1.0);

        let mut store = ParameterStore::new(&mut bank, 1000);
        store.set_pid_params(&params).unwrap();
        store.set_limits(low, high).unwrap();

        let mut reader = FeedbackReader::new(&mut bank);
        assert_eq!(reader.read_pid().unwrap(), params);
        let limits = reader.read_limits().unwrap();
        assert_eq!((limits.low, limits.high), (low, high));
    }
}

#[test]
fn test_write_sequence_for_full_setup() {
    let mut bank = RegisterBank::with_write_log();
    let mut store = ParameterStore::new(&mut bank, 1000);
    store.set_scale(16).unwrap();
    store.set_limits(0.2, 0.8).unwrap();
    store.set_pid(0.001, 660.0, 69.0, 4200.0).unwrap();
    drop(store);

    let indices: Vec<RegisterIndex> = bank.write_log().iter().map(|(idx, _)| *idx).collect();
    assert_eq!(
        indices,
        vec![
            RegisterIndex::Scale,
            RegisterIndex::OutputLimits,
            RegisterIndex::SetpointProportional,
            RegisterIndex::IntegralDerivative,
        ]
    );
    assert_eq!(decode_float_pair(bank.peek(RegisterIndex::OutputLimits)), (0.2, 0.8));
    assert_eq!(
        decode_float_pair(bank.peek(RegisterIndex::SetpointProportional)),
        (0.001, 660.0)
    );
    assert_eq!(
        decode_float_pair(bank.peek(RegisterIndex::IntegralDerivative)),
        (69.0, 4200.0)
    );
}

#[test]
fn test_invalid_limits_leave_registers_untouched() {
    let mut bank = RegisterBank::with_write_log();
    let mut store = ParameterStore::new(&mut bank, 1000);
    store.set_limits(0.2, 0.8).unwrap();

    for (low, high) in [(0.8, 0.2), (-0.1, 1.0), (0.5, 0.5), (0.0, 1.5), (f32::NAN, 0.5)] {
        assert!(matches!(
            store.set_limits(low, high),
            Err(FeedbackError::InvalidLimits { .. })
        ));
    }
    drop(store);

    assert_eq!(bank.write_log().len(), 1);
    assert_eq!(decode_float_pair(bank.peek(RegisterIndex::OutputLimits)), (0.2, 0.8));
}
