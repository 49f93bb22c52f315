use crate::BitVec;
use test_log::test;

#[test]
fn test_set_get_count() {
    let mut bv = BitVec::new(130);
    assert_eq!(bv.count(), 0);
    for i in (0..130).step_by(3) {
        bv.set(i, true);
    }
    for i in 0..130 {
        assert_eq!(bv.get(i), i % 3 == 0);
    }
    assert_eq!(bv.count(), 44);
    assert!(!bv.get(500));
}

#[test]
fn test_set_all_masks_tail() {
    let mut bv = BitVec::new(70);
    bv.set_all();
    assert_eq!(bv.count(), 70);
    assert!(bv.is_full());
    bv.set(69, false);
    assert!(!bv.is_full());
    bv.clear_all();
    assert_eq!(bv.count(), 0);
}

#[test]
fn test_from_words() {
    let bv = BitVec::from_words(vec![u64::MAX, u64::MAX], 65);
    assert_eq!(bv.count(), 65);
    assert_eq!(bv.words().len(), 2);
    let short = BitVec::from_words(vec![], 10);
    assert_eq!(short.words().len(), 1);
    assert_eq!(short.count(), 0);
}
