use sable::eval::nn::NetData;

fn main() {
    sable::initialize();
    let net = NetData::from_embedded();
    sable::uci::run_uci_loop(net);
}
