pub fn hex(buf: &[u8]) -> String {
	hex::encode(buf)
}

pub fn hex_short(buf: &[u8], max: usize) -> String {
	if buf.len() > max {
		format!("{}..", hex::encode(&buf[..max]))
	} else {
		hex::encode(buf)
	}
}
