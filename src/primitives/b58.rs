pub trait ToBase58String {
  fn to_b58(&self) -> String;
}

impl ToBase58String for [u8] {
  fn to_b58(&self) -> String {
    bs58::encode(self).into_string()
  }
}

impl ToBase58String for &[u8] {
  fn to_b58(&self) -> String {
    bs58::encode(self).into_string()
  }
}
