use pqwire::{Connection, Options, Result, State};

pub fn main(options: &Options) -> Result<()> {
    let mut conn = Connection::connect_plain(options)?;
    assert_eq!(conn.state(), State::Idle);

    let results = conn.query("create temp table foo(id int); insert into foo values (1), (2); select * from foo")?;
    crate::print(&results);
    println!("inserted: {}", results[1].rows_affected());

    let mut ids = 0;
    for row in results[2].rows() {
        ids += row.try_get::<i32>(0)?;
    }
    println!("sum of ids: {ids}");

    conn.close()
}
