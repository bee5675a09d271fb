use std::io;

pub fn cerr<Int: Copy + TryInto<libc::c_long>>(res: Int) -> io::Result<Int> {
    match res.try_into() {
        Ok(-1) => Err(io::Error::last_os_error()),
        _ => Ok(res),
    }
}
