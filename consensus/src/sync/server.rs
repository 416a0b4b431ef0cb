use super::{
    GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, SyncVerticesResponseSender,
};
use crate::{store::VertexStore, types::BftNode, Error};
use std::{cell::RefCell, rc::Rc};
use tracing::{debug, trace};

/// Serves vertices from the local store to peers.
pub struct Server<S> {
    me: BftNode,
    store: Rc<RefCell<VertexStore>>,
    sender: S,
}

impl<S: SyncVerticesResponseSender> Server<S> {
    pub fn new(me: BftNode, store: Rc<RefCell<VertexStore>>, sender: S) -> Self {
        Self { me, store, sender }
    }

    /// Answer with the requested vertices, or with the local [crate::types::SyncInfo] if they
    /// are not all held.
    pub fn process_get_vertices_request(&self, request: &GetVerticesRequest) -> Result<(), Error> {
        let store = self.store.borrow();
        match store.get_vertices(request.vertex_id(), request.count()) {
            Some(vertices) => {
                trace!(
                    requester = %request.sender(),
                    vertex = %request.vertex_id(),
                    count = request.count(),
                    "serving vertices"
                );
                self.sender.send_get_vertices_response(
                    request.sender(),
                    GetVerticesResponse::new(self.me.clone(), vertices),
                );
            }
            None => {
                debug!(
                    requester = %request.sender(),
                    vertex = %request.vertex_id(),
                    count = request.count(),
                    "unable to serve vertices"
                );
                self.sender.send_get_vertices_error_response(
                    request.sender(),
                    GetVerticesErrorResponse::new(self.me.clone(), store.sync_info()?),
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mocks::{fixtures::Fixture, senders::Outbound},
        types::Digest,
        validators::tests::node,
    };

    #[test]
    fn serves_held_vertices() {
        let fixture = Fixture::new();
        let mut store = fixture.store();
        let (v1, _) = fixture.extend(&mut store, &fixture.genesis_qc, 1, Some(1));
        fixture.outbox.drain();
        let server = Server::new(node(0), Rc::new(RefCell::new(store)), fixture.outbox.clone());

        server
            .process_get_vertices_request(&GetVerticesRequest::new(node(1), *v1.id(), 2))
            .unwrap();
        assert_eq!(
            fixture.outbox.drain(),
            vec![Outbound::GetVerticesResponse(
                node(1),
                GetVerticesResponse::new(node(0), vec![v1, fixture.genesis.clone()])
            )]
        );
    }

    #[test]
    fn answers_unknown_vertices_with_sync_info() {
        let fixture = Fixture::new();
        let store = fixture.store();
        let sync_info = store.sync_info().unwrap();
        let server = Server::new(node(0), Rc::new(RefCell::new(store)), fixture.outbox.clone());

        server
            .process_get_vertices_request(&GetVerticesRequest::new(
                node(1),
                Digest::new([9; 32]),
                1,
            ))
            .unwrap();
        assert_eq!(
            fixture.outbox.drain(),
            vec![Outbound::GetVerticesErrorResponse(
                node(1),
                GetVerticesErrorResponse::new(node(0), sync_info)
            )]
        );
    }
}
