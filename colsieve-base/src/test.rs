mod bitvec;
