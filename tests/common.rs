use std::sync::Once;

use flexi_logger::Logger;

static INIT: Once = Once::new();

pub fn setup() {
  INIT.call_once(|| {
    Logger::try_with_str("watchbox=debug,info")
      .unwrap()
      .start()
      .unwrap();
  });
}
